use boole_core::tree::TreeNode;

// ── Serialized list form ──────────────────────────────────

/// Round-trippable list form: `{l name I}` or `{l name {16 floats}}`
/// for leaves, `{N}` for the empty tree, `{op {left} {right}}` for
/// binary and `{op {child}}` for unary operators. Identity matrices
/// collapse to the `I` marker.
pub fn serialize(tp: &TreeNode) -> String {
    let mut out = String::new();
    write_node(tp, &mut out);
    out
}

fn write_node(tp: &TreeNode, out: &mut String) {
    match tp {
        TreeNode::Nop => out.push_str("{N}"),
        TreeNode::Leaf { name, matrix } => match matrix {
            Some(m) if !m.is_identity() => {
                out.push_str(&format!("{{l {name} {{{m}}}}}"));
            }
            _ => out.push_str(&format!("{{l {name} I}}")),
        },
        TreeNode::Binary { op, left, right } => {
            out.push_str(&format!("{{{op} "));
            write_node(left, out);
            out.push(' ');
            write_node(right, out);
            out.push('}');
        }
        TreeNode::Unary { op, child } => {
            out.push_str(&format!("{{{op} "));
            write_node(child, out);
            out.push('}');
        }
        other @ (TreeNode::Solid(_) | TreeNode::Region(_) | TreeNode::Freed) => {
            panic!("serialize: {other:?} has no textual form")
        }
    }
}

// ── Human-readable describe ───────────────────────────────

/// Indented one-node-per-line rendering. Operators print as glyph
/// lines, leaves as the member name with a transform note. Unlike
/// [`serialize`] this also renders evaluated trees.
pub fn describe(tp: &TreeNode) -> String {
    let mut out = String::new();
    describe_node(tp, 0, &mut out);
    out
}

fn describe_node(tp: &TreeNode, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    match tp {
        TreeNode::Nop => out.push_str("N\n"),
        TreeNode::Leaf { name, matrix } => {
            out.push_str(name);
            if matrix.is_some() {
                out.push_str(" [xform]");
            }
            out.push('\n');
        }
        TreeNode::Solid(handle) => {
            out.push_str(&format!("{} [solid #{}]\n", handle.name, handle.serial));
        }
        TreeNode::Region(snap) => {
            out.push_str(&format!("{} [region]\n", snap.path));
        }
        TreeNode::Binary { op, left, right } => {
            out.push_str(&format!("{op}\n"));
            describe_node(left, depth + 1, out);
            describe_node(right, depth + 1, out);
        }
        TreeNode::Unary { op, child } => {
            out.push_str(&format!("{op}\n"));
            describe_node(child, depth + 1, out);
        }
        TreeNode::Freed => panic!("describe: freed node in tree"),
    }
}

// ── Tests ─────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use boole_core::matrix::Mat4;
    use boole_core::tree::BinaryOp;

    fn sample() -> TreeNode {
        TreeNode::Binary {
            op:    BinaryOp::Union,
            left:  Box::new(TreeNode::leaf("a")),
            right: Box::new(TreeNode::Binary {
                op:    BinaryOp::Subtract,
                left:  Box::new(TreeNode::leaf_with_matrix(
                    "b",
                    Mat4::translation(1.0, 0.0, 0.0),
                )),
                right: Box::new(TreeNode::Nop),
            }),
        }
    }

    #[test]
    fn serialized_form_is_exact() {
        assert_eq!(
            serialize(&sample()),
            "{u {l a I} {- {l b {1 0 0 1 0 1 0 0 0 0 1 0 0 0 0 1}} {N}}}",
        );
    }

    #[test]
    fn identity_matrices_collapse_to_the_marker() {
        let leaf = TreeNode::leaf_with_matrix("a", Mat4::IDENTITY);
        assert_eq!(serialize(&leaf), "{l a I}");
    }

    #[test]
    fn describe_renders_one_node_per_line() {
        assert_eq!(describe(&sample()), "u\n  a\n  -\n    b [xform]\n    N\n");
    }
}
