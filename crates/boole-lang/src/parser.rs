use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use tracing::warn;

use boole_core::matrix::Mat4;
use boole_core::tree::{BinaryOp, NodePool, TreeNode, UnaryOp};

use crate::error::LangError;

// ── Pest parser derive ─────────────────────────────────────

#[derive(Parser)]
#[grammar = "src/tree.pest"]
pub struct TreeParser;

// ── Public entry point ────────────────────────────────────

/// Parse the serialized list form into a tree, allocating nodes from
/// `pool`.
///
/// Structural problems (bad arity, multi-character or unknown
/// operators) are errors. A matrix that cannot be read falls back to
/// identity with a diagnostic.
pub fn parse(input: &str, pool: &mut NodePool) -> Result<Box<TreeNode>, LangError> {
    let pairs = TreeParser::parse(Rule::tree, input)
        .map_err(|e| LangError::Parse(e.to_string()))?;
    let tree_pair = pairs
        .into_iter()
        .next()
        .ok_or_else(|| LangError::Parse("empty input".into()))?;
    let node_pair = tree_pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::node)
        .ok_or_else(|| LangError::Parse("no tree node".into()))?;
    parse_node(node_pair, pool)
}

// ── List validation ───────────────────────────────────────

fn parse_node(pair: Pair<Rule>, pool: &mut NodePool) -> Result<Box<TreeNode>, LangError> {
    let mut items = pair.into_inner();
    let tag = items
        .next()
        .ok_or_else(|| LangError::Parse("empty list".into()))?;
    if tag.as_rule() != Rule::word {
        return Err(LangError::Parse(format!(
            "operator must be a bare word, found '{}'",
            tag.as_str()
        )));
    }
    let tag_text = tag.as_str();
    let mut chars = tag_text.chars();
    let op = chars
        .next()
        .ok_or_else(|| LangError::Parse("empty operator".into()))?;
    if chars.next().is_some() {
        return Err(LangError::Parse(format!(
            "operator '{tag_text}' is not a single character"
        )));
    }
    let rest: Vec<Pair<Rule>> = items.collect();

    match op {
        'l' => parse_leaf(rest, pool),
        'N' => {
            if !rest.is_empty() {
                return Err(LangError::Parse(format!(
                    "N takes no operands, found {}",
                    rest.len()
                )));
            }
            Ok(pool.alloc(TreeNode::Nop))
        }
        'u' | 'n' | '-' | '^' => {
            let op = match op {
                'u' => BinaryOp::Union,
                'n' => BinaryOp::Intersect,
                '-' => BinaryOp::Subtract,
                _ => BinaryOp::Xor,
            };
            if rest.len() != 2 {
                return Err(LangError::Parse(format!(
                    "operator '{}' expects 2 operands, found {}",
                    op.glyph(),
                    rest.len()
                )));
            }
            let mut operands = rest.into_iter();
            let (Some(lp), Some(rp)) = (operands.next(), operands.next()) else {
                unreachable!();
            };
            let left = subtree(lp, pool)?;
            let right = subtree(rp, pool)?;
            Ok(pool.alloc(TreeNode::Binary { op, left, right }))
        }
        '!' | 'G' | 'X' => {
            let op = match op {
                '!' => UnaryOp::Not,
                'G' => UnaryOp::Guard,
                _ => UnaryOp::Xnop,
            };
            if rest.len() != 1 {
                return Err(LangError::Parse(format!(
                    "operator '{}' expects 1 operand, found {}",
                    op.glyph(),
                    rest.len()
                )));
            }
            let mut operands = rest.into_iter();
            let Some(cp) = operands.next() else {
                unreachable!();
            };
            let child = subtree(cp, pool)?;
            Ok(pool.alloc(TreeNode::Unary { op, child }))
        }
        other => Err(LangError::Parse(format!("unknown operator '{other}'"))),
    }
}

fn subtree(pair: Pair<Rule>, pool: &mut NodePool) -> Result<Box<TreeNode>, LangError> {
    if pair.as_rule() != Rule::node {
        return Err(LangError::Parse(format!(
            "expected a braced subtree, found '{}'",
            pair.as_str()
        )));
    }
    parse_node(pair, pool)
}

fn parse_leaf(operands: Vec<Pair<Rule>>, pool: &mut NodePool) -> Result<Box<TreeNode>, LangError> {
    if operands.is_empty() || operands.len() > 2 {
        return Err(LangError::Parse(format!(
            "leaf expects a name and an optional matrix, found {} operands",
            operands.len()
        )));
    }
    let mut operands = operands.into_iter();
    let Some(name_pair) = operands.next() else {
        unreachable!();
    };
    if name_pair.as_rule() != Rule::word {
        return Err(LangError::Parse("leaf name must be a bare word".into()));
    }
    let name = name_pair.as_str().to_string();
    let matrix = operands.next().and_then(parse_matrix);
    Ok(pool.alloc(match matrix {
        Some(matrix) => TreeNode::leaf_with_matrix(name, matrix),
        None => TreeNode::leaf(name),
    }))
}

/// `I` or a braced list of 16 floats. Anything unreadable falls back
/// to identity with a diagnostic; identity never round-trips into a
/// stored matrix.
fn parse_matrix(pair: Pair<Rule>) -> Option<Mat4> {
    let raw = pair.as_str();
    match pair.as_rule() {
        Rule::word if raw == "I" => None,
        Rule::node => {
            let text = pair
                .into_inner()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            match Mat4::parse(&text) {
                Some(m) if m.is_identity() => None,
                Some(m) => Some(m),
                None => {
                    warn!(matrix = %text, "unreadable matrix, using identity");
                    None
                }
            }
        }
        _ => {
            warn!(matrix = %raw, "unreadable matrix, using identity");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::serialize;

    #[test]
    fn round_trip_preserves_structure() {
        let mut pool = NodePool::new();
        let tree = TreeNode::Binary {
            op:    BinaryOp::Union,
            left:  Box::new(TreeNode::Binary {
                op:    BinaryOp::Subtract,
                left:  Box::new(TreeNode::leaf("hull")),
                right: Box::new(TreeNode::leaf_with_matrix(
                    "bore",
                    Mat4::translation(4.0, 0.0, -2.5),
                )),
            }),
            right: Box::new(TreeNode::Unary {
                op:    UnaryOp::Not,
                child: Box::new(TreeNode::Binary {
                    op:    BinaryOp::Xor,
                    left:  Box::new(TreeNode::leaf("cap")),
                    right: Box::new(TreeNode::Nop),
                }),
            }),
        };
        let text = serialize(&tree);
        let parsed = parse(&text, &mut pool).unwrap();
        assert_eq!(*parsed, tree);
    }

    #[test]
    fn leaf_matrix_is_optional_and_identity_collapses() {
        let mut pool = NodePool::new();
        let bare = parse("{l axle}", &mut pool).unwrap();
        assert_eq!(*bare, TreeNode::leaf("axle"));

        let marked = parse("{l axle I}", &mut pool).unwrap();
        assert_eq!(*marked, TreeNode::leaf("axle"));

        let spelled = parse(
            "{l axle {1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1}}",
            &mut pool,
        )
        .unwrap();
        assert_eq!(*spelled, TreeNode::leaf("axle"));
    }

    #[test]
    fn gift_shaped_input_parses_left_heavy() {
        let mut pool = NodePool::new();
        let parsed = parse("{u {u {l a} {l b}} {l c}}", &mut pool).unwrap();
        let TreeNode::Binary { op: BinaryOp::Union, left, right } = &*parsed else {
            panic!("expected a union root");
        };
        assert_eq!(**right, TreeNode::leaf("c"));
        assert!(matches!(&**left, TreeNode::Binary { op: BinaryOp::Union, .. }));
    }

    #[test]
    fn wrong_operand_counts_are_rejected() {
        let mut pool = NodePool::new();
        assert!(parse("{u {l a}}", &mut pool).is_err());
        assert!(parse("{- {l a} {l b} {l c}}", &mut pool).is_err());
        assert!(parse("{! {l a} {l b}}", &mut pool).is_err());
        assert!(parse("{l}", &mut pool).is_err());
        assert!(parse("{N {l a}}", &mut pool).is_err());
    }

    #[test]
    fn operator_tags_must_be_single_known_characters() {
        let mut pool = NodePool::new();
        let err = parse("{union {l a} {l b}}", &mut pool).unwrap_err();
        let LangError::Parse(msg) = err;
        assert!(msg.contains("union"));
        assert!(parse("{q {l a}}", &mut pool).is_err());
    }

    #[test]
    fn unreadable_matrices_fall_back_to_identity() {
        let mut pool = NodePool::new();
        let short = parse("{l a {1 2 3}}", &mut pool).unwrap();
        assert_eq!(*short, TreeNode::leaf("a"));

        let garbage = parse("{l a {x y z}}", &mut pool).unwrap();
        assert_eq!(*garbage, TreeNode::leaf("a"));

        let bare_word = parse("{l a nonsense}", &mut pool).unwrap();
        assert_eq!(*bare_word, TreeNode::leaf("a"));
    }

    #[test]
    fn trailing_input_is_rejected() {
        let mut pool = NodePool::new();
        assert!(parse("{N} {N}", &mut pool).is_err());
        assert!(parse("", &mut pool).is_err());
    }

    #[test]
    fn whitespace_between_tokens_is_free_form() {
        let mut pool = NodePool::new();
        let parsed = parse("\n{ u\n\t{l a}\n\t{- {l b}  {N} } }\n", &mut pool).unwrap();
        let expect = TreeNode::Binary {
            op:    BinaryOp::Union,
            left:  Box::new(TreeNode::leaf("a")),
            right: Box::new(TreeNode::Binary {
                op:    BinaryOp::Subtract,
                left:  Box::new(TreeNode::leaf("b")),
                right: Box::new(TreeNode::Nop),
            }),
        };
        assert_eq!(*parsed, expect);
    }
}
