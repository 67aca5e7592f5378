use std::mem;

use crate::tree::{dup_subtree, BinaryOp, NodePool, TreeNode};

// ─────────────────────────────────────────────
// Union-normal form
// ─────────────────────────────────────────────
//
// A tree is in union-normal form when no union operator appears below
// any non-union operator. Three node-local rewrites establish it:
//
//   (A u B) n C  =  (A n C) u (B n C)
//   (A u B) - C  =  (A - C) u (B - C)
//   C n (A u B)  =  (C n A) u (C n B)
//   C - (A u B)  =  (C - A) - B
//
// The first two share one implementation. Distribution duplicates C;
// the hoist for subtraction allocates nothing.

/// Outcome of one rewrite attempt at a node.
enum Rewrite {
    /// No rule applies here.
    None,
    /// A degenerate branch was spliced out; the node must be
    /// re-examined but its subtrees are untouched.
    Spliced,
    /// A distribution rewrote the node; both new subtrees need a
    /// fresh push before the node is re-examined.
    Distributed,
}

/// Rewrite the whole tree into union-normal form.
///
/// Subtrees hanging off unions are preserved as units, so a
/// subsequent partition pass can hand each one out independently.
/// `Nop` branches produced by pruning collapse out along the way.
pub fn non_union_push(tp: &mut TreeNode, pool: &mut NodePool) {
    match tp {
        TreeNode::Leaf { .. } | TreeNode::Solid(_) | TreeNode::Region(_) | TreeNode::Nop => return,
        TreeNode::Unary { child, .. } => {
            non_union_push(child, pool);
            return;
        }
        TreeNode::Binary { left, right, .. } => {
            non_union_push(left, pool);
            non_union_push(right, pool);
        }
        TreeNode::Freed => panic!("non_union_push: freed node in tree"),
    }
    loop {
        match rewrite_at(tp, pool) {
            Rewrite::None => break,
            Rewrite::Spliced => continue,
            Rewrite::Distributed => {
                if let TreeNode::Binary { left, right, .. } = tp {
                    non_union_push(left, pool);
                    non_union_push(right, pool);
                }
            }
        }
    }
    rotate_unions_left(tp);
}

fn rewrite_at(tp: &mut TreeNode, pool: &mut NodePool) -> Rewrite {
    let (op, left_is_union, right_is_union) = match tp {
        TreeNode::Binary { op, left, right } => (
            *op,
            matches!(&**left, TreeNode::Binary { op: BinaryOp::Union, .. }),
            matches!(&**right, TreeNode::Binary { op: BinaryOp::Union, .. }),
        ),
        _ => return Rewrite::None,
    };
    match (op, left_is_union, right_is_union) {
        (BinaryOp::Intersect | BinaryOp::Subtract, true, _) => distribute_left(tp, op, pool),
        (BinaryOp::Intersect, _, true) => distribute_right(tp, pool),
        (BinaryOp::Subtract, _, true) => hoist_right(tp, pool),
        _ => Rewrite::None,
    }
}

/// (A u B) op C becomes (A op C') u (B op C), with the duplicate on
/// the left. Degenerate unions splice instead of distributing.
fn distribute_left(tp: &mut TreeNode, op: BinaryOp, pool: &mut NodePool) -> Rewrite {
    let TreeNode::Binary { left: mut lhs, right: c, .. } = mem::replace(tp, TreeNode::Freed) else {
        unreachable!("distribute_left: checked shape");
    };
    let TreeNode::Binary { left: a, right: b, .. } = mem::replace(&mut *lhs, TreeNode::Freed) else {
        unreachable!("distribute_left: checked shape");
    };
    match (a.is_nop(), b.is_nop()) {
        (true, true) => {
            pool.free_tree(a);
            pool.free_tree(b);
            pool.free_tree(c);
            pool.release(lhs);
            *tp = TreeNode::Nop;
            Rewrite::Spliced
        }
        (true, false) => {
            pool.free_tree(a);
            pool.release(lhs);
            *tp = TreeNode::Binary { op, left: b, right: c };
            Rewrite::Spliced
        }
        (false, true) => {
            pool.free_tree(b);
            pool.release(lhs);
            *tp = TreeNode::Binary { op, left: a, right: c };
            Rewrite::Spliced
        }
        (false, false) => {
            let c_dup = dup_subtree(&c, pool);
            // The stripped union shell becomes the left product node.
            *lhs = TreeNode::Binary { op, left: a, right: c_dup };
            let product = pool.alloc(TreeNode::Binary { op, left: b, right: c });
            *tp = TreeNode::Binary { op: BinaryOp::Union, left: lhs, right: product };
            Rewrite::Distributed
        }
    }
}

/// C n (A u B) becomes (C n A) u (C' n B), original C on the left.
fn distribute_right(tp: &mut TreeNode, pool: &mut NodePool) -> Rewrite {
    let TreeNode::Binary { left: c, right: mut rhs, .. } = mem::replace(tp, TreeNode::Freed) else {
        unreachable!("distribute_right: checked shape");
    };
    let TreeNode::Binary { left: a, right: b, .. } = mem::replace(&mut *rhs, TreeNode::Freed) else {
        unreachable!("distribute_right: checked shape");
    };
    match (a.is_nop(), b.is_nop()) {
        (true, true) => {
            pool.free_tree(a);
            pool.free_tree(b);
            pool.free_tree(c);
            pool.release(rhs);
            *tp = TreeNode::Nop;
            Rewrite::Spliced
        }
        (true, false) => {
            pool.free_tree(a);
            pool.release(rhs);
            *tp = TreeNode::Binary { op: BinaryOp::Intersect, left: c, right: b };
            Rewrite::Spliced
        }
        (false, true) => {
            pool.free_tree(b);
            pool.release(rhs);
            *tp = TreeNode::Binary { op: BinaryOp::Intersect, left: c, right: a };
            Rewrite::Spliced
        }
        (false, false) => {
            let c_dup = dup_subtree(&c, pool);
            *rhs = TreeNode::Binary { op: BinaryOp::Intersect, left: c, right: a };
            let product = pool.alloc(TreeNode::Binary {
                op: BinaryOp::Intersect,
                left: c_dup,
                right: b,
            });
            *tp = TreeNode::Binary { op: BinaryOp::Union, left: rhs, right: product };
            Rewrite::Distributed
        }
    }
}

/// C - (A u B) becomes (C - A) - B. No duplication needed; the union
/// shell is reused for the inner subtraction.
fn hoist_right(tp: &mut TreeNode, pool: &mut NodePool) -> Rewrite {
    let TreeNode::Binary { left: c, right: mut rhs, .. } = mem::replace(tp, TreeNode::Freed) else {
        unreachable!("hoist_right: checked shape");
    };
    if c.is_nop() {
        // Nothing left to subtract from.
        pool.free_tree(c);
        pool.free_tree(rhs);
        *tp = TreeNode::Nop;
        return Rewrite::Spliced;
    }
    let TreeNode::Binary { left: a, right: b, .. } = mem::replace(&mut *rhs, TreeNode::Freed) else {
        unreachable!("hoist_right: checked shape");
    };
    match (a.is_nop(), b.is_nop()) {
        (true, true) => {
            pool.free_tree(a);
            pool.free_tree(b);
            pool.release(rhs);
            let mut c = c;
            *tp = mem::replace(&mut *c, TreeNode::Freed);
            pool.release(c);
            Rewrite::Spliced
        }
        (true, false) => {
            pool.free_tree(a);
            pool.release(rhs);
            *tp = TreeNode::Binary { op: BinaryOp::Subtract, left: c, right: b };
            Rewrite::Spliced
        }
        (false, true) => {
            pool.free_tree(b);
            pool.release(rhs);
            *tp = TreeNode::Binary { op: BinaryOp::Subtract, left: c, right: a };
            Rewrite::Spliced
        }
        (false, false) => {
            *rhs = TreeNode::Binary { op: BinaryOp::Subtract, left: c, right: a };
            *tp = TreeNode::Binary { op: BinaryOp::Subtract, left: rhs, right: b };
            Rewrite::Distributed
        }
    }
}

/// Node-local left rotation: while the right child of a union is
/// itself a union, rotate it up. Run at every node on the way out of
/// [`non_union_push`], this keeps union spines from leaning right.
pub fn rotate_unions_left(tp: &mut TreeNode) {
    loop {
        let TreeNode::Binary { op: BinaryOp::Union, right, .. } = tp else { return };
        if !matches!(&**right, TreeNode::Binary { op: BinaryOp::Union, .. }) {
            return;
        }
        let TreeNode::Binary { left, right: mut r, op } = mem::replace(tp, TreeNode::Freed) else {
            unreachable!("rotate_unions_left: checked shape");
        };
        let TreeNode::Binary { left: rl, right: rr, .. } = mem::replace(&mut *r, TreeNode::Freed)
        else {
            unreachable!("rotate_unions_left: checked shape");
        };
        // The old right shell is reused as the new left child.
        *r = TreeNode::Binary { op: BinaryOp::Union, left, right: rl };
        *tp = TreeNode::Binary { op, left: r, right: rr };
    }
}

// ─────────────────────────────────────────────
// Predicates
// ─────────────────────────────────────────────

fn union_free(tp: &TreeNode) -> bool {
    match tp {
        TreeNode::Binary { op: BinaryOp::Union, .. } => false,
        TreeNode::Binary { left, right, .. } => union_free(left) && union_free(right),
        TreeNode::Unary { child, .. } => union_free(child),
        _ => true,
    }
}

/// Whether no union operator appears below any non-union operator.
pub fn is_union_normal_form(tp: &TreeNode) -> bool {
    match tp {
        TreeNode::Binary { op: BinaryOp::Union, left, right } => {
            is_union_normal_form(left) && is_union_normal_form(right)
        }
        TreeNode::Binary { left, right, .. } => union_free(left) && union_free(right),
        TreeNode::Unary { child, .. } => union_free(child),
        _ => true,
    }
}

/// Whether no union appears as the right child of another union.
pub fn is_left_heavy(tp: &TreeNode) -> bool {
    match tp {
        TreeNode::Binary { op: BinaryOp::Union, left, right } => {
            !matches!(&**right, TreeNode::Binary { op: BinaryOp::Union, .. })
                && is_left_heavy(left)
                && is_left_heavy(right)
        }
        TreeNode::Binary { left, right, .. } => is_left_heavy(left) && is_left_heavy(right),
        TreeNode::Unary { child, .. } => is_left_heavy(child),
        _ => true,
    }
}

// ─────────────────────────────────────────────
// Partitioning
// ─────────────────────────────────────────────

/// Upper bound on how many candidate subtrees a partition of `tp`
/// will yield: one per subtree hanging off the union spine, `Nop`
/// slots included.
pub fn count_regions(tp: &TreeNode) -> usize {
    match tp {
        TreeNode::Binary { op: BinaryOp::Union, left, right } => {
            count_regions(left) + count_regions(right)
        }
        _ => 1,
    }
}

/// Move every subtree hanging off the union spine out of `tp`,
/// leaving `Nop` stubs behind. `Nop` spine slots are skipped, so the
/// result can be shorter than [`count_regions`] predicted. The
/// remaining skeleton is all unions and stubs; the caller frees it.
pub fn extract_regions(tp: &mut TreeNode, pool: &mut NodePool) -> Vec<Box<TreeNode>> {
    let mut out = Vec::with_capacity(count_regions(tp));
    tally(tp, pool, &mut out);
    out
}

fn tally(tp: &mut TreeNode, pool: &mut NodePool, out: &mut Vec<Box<TreeNode>>) {
    match tp {
        TreeNode::Nop => {}
        TreeNode::Binary { op: BinaryOp::Union, left, right } => {
            tally(left, pool, out);
            tally(right, pool, out);
        }
        _ => {
            let sub = mem::replace(tp, TreeNode::Nop);
            out.push(pool.alloc(sub));
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::tree::leaf_count;

    fn bin(op: BinaryOp, left: TreeNode, right: TreeNode) -> TreeNode {
        TreeNode::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    fn l(name: &str) -> TreeNode {
        TreeNode::leaf(name)
    }

    fn pushed(tree: TreeNode) -> (TreeNode, NodePool) {
        let mut pool = NodePool::new();
        let mut tp = tree;
        non_union_push(&mut tp, &mut pool);
        (tp, pool)
    }

    #[test]
    fn intersect_distributes_over_left_union() {
        let (got, _) = pushed(bin(
            BinaryOp::Intersect,
            bin(BinaryOp::Union, l("a"), l("b")),
            l("c"),
        ));
        let want = bin(
            BinaryOp::Union,
            bin(BinaryOp::Intersect, l("a"), l("c")),
            bin(BinaryOp::Intersect, l("b"), l("c")),
        );
        assert_eq!(got, want);
        assert!(is_union_normal_form(&got));
    }

    #[test]
    fn subtract_distributes_over_left_union() {
        let (got, _) = pushed(bin(
            BinaryOp::Subtract,
            bin(BinaryOp::Union, l("a"), l("b")),
            l("c"),
        ));
        let want = bin(
            BinaryOp::Union,
            bin(BinaryOp::Subtract, l("a"), l("c")),
            bin(BinaryOp::Subtract, l("b"), l("c")),
        );
        assert_eq!(got, want);
    }

    #[test]
    fn intersect_distributes_over_right_union() {
        let (got, _) = pushed(bin(
            BinaryOp::Intersect,
            l("c"),
            bin(BinaryOp::Union, l("a"), l("b")),
        ));
        let want = bin(
            BinaryOp::Union,
            bin(BinaryOp::Intersect, l("c"), l("a")),
            bin(BinaryOp::Intersect, l("c"), l("b")),
        );
        assert_eq!(got, want);
    }

    #[test]
    fn subtract_hoists_a_right_union() {
        let (got, _) = pushed(bin(
            BinaryOp::Subtract,
            l("c"),
            bin(BinaryOp::Union, l("a"), l("b")),
        ));
        let want = bin(
            BinaryOp::Subtract,
            bin(BinaryOp::Subtract, l("c"), l("a")),
            l("b"),
        );
        assert_eq!(got, want);
        assert!(is_union_normal_form(&got));
    }

    #[test]
    fn crossed_unions_fan_out_to_four_products() {
        let (got, _) = pushed(bin(
            BinaryOp::Intersect,
            bin(BinaryOp::Union, l("a"), l("b")),
            bin(BinaryOp::Union, l("c"), l("d")),
        ));
        assert!(is_union_normal_form(&got));
        assert!(is_left_heavy(&got));
        assert_eq!(count_regions(&got), 4);

        let want = bin(
            BinaryOp::Union,
            bin(
                BinaryOp::Union,
                bin(
                    BinaryOp::Union,
                    bin(BinaryOp::Intersect, l("a"), l("c")),
                    bin(BinaryOp::Intersect, l("a"), l("d")),
                ),
                bin(BinaryOp::Intersect, l("b"), l("c")),
            ),
            bin(BinaryOp::Intersect, l("b"), l("d")),
        );
        assert_eq!(got, want);
    }

    #[test]
    fn right_leaning_unions_rotate_left() {
        let (got, _) = pushed(bin(
            BinaryOp::Union,
            l("a"),
            bin(BinaryOp::Union, l("b"), l("c")),
        ));
        let want = bin(
            BinaryOp::Union,
            bin(BinaryOp::Union, l("a"), l("b")),
            l("c"),
        );
        assert_eq!(got, want);
        assert!(is_left_heavy(&got));
    }

    #[test]
    fn nop_branches_splice_out() {
        // (N u b) - c collapses to b - c
        let (got, _) = pushed(bin(
            BinaryOp::Subtract,
            bin(BinaryOp::Union, TreeNode::Nop, l("b")),
            l("c"),
        ));
        assert_eq!(got, bin(BinaryOp::Subtract, l("b"), l("c")));

        // c - (N u N) collapses to c
        let (got, _) = pushed(bin(
            BinaryOp::Subtract,
            l("c"),
            bin(BinaryOp::Union, TreeNode::Nop, TreeNode::Nop),
        ));
        assert_eq!(got, l("c"));

        // N - (a u b) is nothing at all
        let (got, _) = pushed(bin(
            BinaryOp::Subtract,
            TreeNode::Nop,
            bin(BinaryOp::Union, l("a"), l("b")),
        ));
        assert_eq!(got, TreeNode::Nop);

        // (N u N) n c frees the whole node
        let (got, _) = pushed(bin(
            BinaryOp::Intersect,
            bin(BinaryOp::Union, TreeNode::Nop, TreeNode::Nop),
            l("c"),
        ));
        assert_eq!(got, TreeNode::Nop);
    }

    #[test]
    fn distribution_chains_until_no_union_remains_below() {
        // ((a u b) u c) n d needs two rounds at the top node.
        let (got, _) = pushed(bin(
            BinaryOp::Intersect,
            bin(BinaryOp::Union, bin(BinaryOp::Union, l("a"), l("b")), l("c")),
            l("d"),
        ));
        assert!(is_union_normal_form(&got));
        assert_eq!(count_regions(&got), 3);
        assert_eq!(leaf_count(&got), 6);
    }

    #[test]
    fn partition_moves_spine_subtrees_out() {
        let mut pool = NodePool::new();
        let mut tree = bin(
            BinaryOp::Union,
            bin(BinaryOp::Subtract, l("a"), l("b")),
            l("c"),
        );
        non_union_push(&mut tree, &mut pool);
        assert_eq!(count_regions(&tree), 2);

        let parts = extract_regions(&mut tree, &mut pool);
        assert_eq!(parts.len(), 2);
        assert_eq!(*parts[0], bin(BinaryOp::Subtract, l("a"), l("b")));
        assert_eq!(*parts[1], l("c"));

        // Skeleton is nothing but union glue and stubs now.
        fn only_glue(tp: &TreeNode) -> bool {
            match tp {
                TreeNode::Nop => true,
                TreeNode::Binary { op: BinaryOp::Union, left, right } => {
                    only_glue(left) && only_glue(right)
                }
                _ => false,
            }
        }
        assert!(only_glue(&tree));
    }

    #[test]
    fn extraction_skips_nop_spine_slots() {
        let mut pool = NodePool::new();
        let mut tree = bin(BinaryOp::Union, TreeNode::Nop, l("c"));
        let parts = extract_regions(&mut tree, &mut pool);
        assert_eq!(parts.len(), 1);
        assert_eq!(*parts[0], l("c"));
    }

    fn random_tree(rng: &mut StdRng, depth: usize, next: &mut u32, with_nops: bool) -> TreeNode {
        if depth == 0 || rng.gen_range(0..10) < 3 {
            if with_nops && rng.gen_range(0..6) == 0 {
                return TreeNode::Nop;
            }
            *next += 1;
            return l(&format!("s{next}"));
        }
        let op = match rng.gen_range(0..3) {
            0 => BinaryOp::Union,
            1 => BinaryOp::Intersect,
            _ => BinaryOp::Subtract,
        };
        bin(
            op,
            random_tree(rng, depth - 1, next, with_nops),
            random_tree(rng, depth - 1, next, with_nops),
        )
    }

    fn leaf_names(tp: &TreeNode, out: &mut std::collections::BTreeSet<String>) {
        match tp {
            TreeNode::Leaf { name, .. } => {
                out.insert(name.clone());
            }
            TreeNode::Binary { left, right, .. } => {
                leaf_names(left, out);
                leaf_names(right, out);
            }
            _ => {}
        }
    }

    #[test]
    fn random_trees_always_normalize() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for round in 0..200 {
            let mut next = 0;
            let mut tree = random_tree(&mut rng, 5, &mut next, true);
            let mut pool = NodePool::new();
            non_union_push(&mut tree, &mut pool);
            assert!(is_union_normal_form(&tree), "round {round}: {tree:?}");
        }
    }

    #[test]
    fn normalization_without_pruning_keeps_every_leaf_name() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let mut next = 0;
            let mut tree = random_tree(&mut rng, 5, &mut next, false);
            let mut before = std::collections::BTreeSet::new();
            leaf_names(&tree, &mut before);

            let mut pool = NodePool::new();
            non_union_push(&mut tree, &mut pool);
            let mut after = std::collections::BTreeSet::new();
            leaf_names(&tree, &mut after);
            assert_eq!(before, after);
        }
    }

    #[test]
    fn extraction_never_exceeds_the_counted_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let mut next = 0;
            let mut tree = random_tree(&mut rng, 5, &mut next, true);
            let mut pool = NodePool::new();
            non_union_push(&mut tree, &mut pool);

            let bound = count_regions(&tree);
            let leaves = leaf_count(&tree);
            let parts = extract_regions(&mut tree, &mut pool);
            assert!(parts.len() <= bound);
            let sum: usize = parts.iter().map(|t| leaf_count(t)).sum();
            assert_eq!(sum, leaves, "partition must account for every leaf");
        }
    }
}
