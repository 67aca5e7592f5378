use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DbError;
use crate::matrix::Mat4;
use crate::state::CombinedState;

// ─────────────────────────────────────────────
// Operators
// ─────────────────────────────────────────────

/// Binary boolean operators, in evaluation-glyph order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Union,
    Intersect,
    Subtract,
    Xor,
}

impl BinaryOp {
    pub fn glyph(self) -> char {
        match self {
            BinaryOp::Union => 'u',
            BinaryOp::Intersect => 'n',
            BinaryOp::Subtract => '-',
            BinaryOp::Xor => '^',
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.glyph())
    }
}

/// Unary operators: complement, guard, and the transparent marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Guard,
    Xnop,
}

impl UnaryOp {
    pub fn glyph(self) -> char {
        match self {
            UnaryOp::Not => '!',
            UnaryOp::Guard => 'G',
            UnaryOp::Xnop => 'X',
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.glyph())
    }
}

// ─────────────────────────────────────────────
// Tree nodes
// ─────────────────────────────────────────────

/// Opaque handle to a prepared primitive, produced by leaf callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SolidHandle {
    pub name: String,
    pub serial: u64,
}

/// One node of a boolean expression tree.
///
/// Every node is exclusively owned by its parent. Sharing happens only
/// at the directory level: two `Leaf` nodes may carry the same name,
/// but no node is ever reachable from two parents.
///
/// Lifecycle: `Leaf` (unresolved) nodes turn into `Solid`, `Region` or
/// `Nop` during a walk; `Freed` is the poisoned discriminant written by
/// the pool before a node is recycled, so a stale alias trips the next
/// structural operation instead of reading recycled memory.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    /// Reference to a directory entry by name, with an optional member
    /// matrix (`None` means identity).
    Leaf {
        name: String,
        matrix: Option<Mat4>,
    },
    Binary {
        op: BinaryOp,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Unary {
        op: UnaryOp,
        child: Box<TreeNode>,
    },
    /// Terminal produced by leaf evaluation.
    Solid(SolidHandle),
    /// Terminal recorded where phase-1 descent crossed a region
    /// boundary: the frozen state plus the path that reached it.
    Region(Box<CombinedState>),
    /// Placeholder left where a leaf failed to resolve or was pruned.
    Nop,
    /// Poisoned discriminant of a node returned to the pool.
    Freed,
}

impl TreeNode {
    pub fn leaf(name: impl Into<String>) -> TreeNode {
        TreeNode::Leaf { name: name.into(), matrix: None }
    }

    pub fn leaf_with_matrix(name: impl Into<String>, matrix: Mat4) -> TreeNode {
        TreeNode::Leaf { name: name.into(), matrix: Some(matrix) }
    }

    #[inline]
    pub fn is_nop(&self) -> bool {
        matches!(self, TreeNode::Nop)
    }

    /// Terminals are the countable leaves: name references, prepared
    /// solids and region snapshots.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TreeNode::Leaf { .. } | TreeNode::Solid(_) | TreeNode::Region(_)
        )
    }
}

// ─────────────────────────────────────────────
// Node pool
// ─────────────────────────────────────────────

/// Free list of recycled tree nodes.
///
/// One pool belongs to exactly one thread of control; the parallel
/// walker hands each worker its own pool so node recycling never
/// contends across threads. Slot 0 of the walker's pool table doubles
/// as the default pool for single-threaded callers.
#[derive(Debug, Default)]
pub struct NodePool {
    free: Vec<Box<TreeNode>>,
}

impl NodePool {
    pub fn new() -> NodePool {
        NodePool { free: Vec::new() }
    }

    /// Nodes currently waiting for reuse.
    #[inline]
    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    /// Obtain a node box holding `node`, reusing a recycled box when
    /// one is available.
    pub fn alloc(&mut self, node: TreeNode) -> Box<TreeNode> {
        match self.free.pop() {
            Some(mut b) => {
                *b = node;
                b
            }
            None => Box::new(node),
        }
    }

    /// Return a single node box to the pool, poisoning its
    /// discriminant. Children, if any were present, must already have
    /// been moved out.
    pub fn release(&mut self, mut shell: Box<TreeNode>) {
        *shell = TreeNode::Freed;
        self.free.push(shell);
    }

    /// Recursively release a whole subtree.
    ///
    /// The discriminant is poisoned before recursing into children, so
    /// a concurrent double free trips on `Freed` instead of walking a
    /// half-reclaimed structure.
    pub fn free_tree(&mut self, mut tp: Box<TreeNode>) {
        let node = mem::replace(&mut *tp, TreeNode::Freed);
        match node {
            TreeNode::Freed => panic!("free_tree: node already freed"),
            TreeNode::Nop
            | TreeNode::Leaf { .. }
            | TreeNode::Solid(_)
            | TreeNode::Region(_) => {}
            TreeNode::Unary { child, .. } => self.free_tree(child),
            TreeNode::Binary { left, right, .. } => {
                self.free_tree(left);
                self.free_tree(right);
            }
        }
        self.free.push(tp);
    }
}

// ─────────────────────────────────────────────
// Structural operations
// ─────────────────────────────────────────────

/// Count the terminals of a tree. Unary nodes are transparent, binary
/// nodes sum both sides, `Nop` counts for nothing.
///
/// Panics on a freed node; a tree reaching here with one is corrupt.
pub fn leaf_count(tp: &TreeNode) -> usize {
    match tp {
        TreeNode::Leaf { .. } | TreeNode::Solid(_) | TreeNode::Region(_) => 1,
        TreeNode::Nop => 0,
        TreeNode::Unary { child, .. } => leaf_count(child),
        TreeNode::Binary { left, right, .. } => leaf_count(left) + leaf_count(right),
        TreeNode::Freed => panic!("leaf_count: freed node in tree"),
    }
}

/// Deep structural copy, including owned strings, matrices and region
/// snapshots.
pub fn dup_subtree(tp: &TreeNode, pool: &mut NodePool) -> Box<TreeNode> {
    let node = match tp {
        TreeNode::Nop => TreeNode::Nop,
        TreeNode::Leaf { name, matrix } => TreeNode::Leaf {
            name: name.clone(),
            matrix: *matrix,
        },
        TreeNode::Solid(h) => TreeNode::Solid(h.clone()),
        TreeNode::Region(cts) => TreeNode::Region(cts.clone()),
        TreeNode::Unary { op, child } => TreeNode::Unary {
            op: *op,
            child: dup_subtree(child, pool),
        },
        TreeNode::Binary { op, left, right } => TreeNode::Binary {
            op: *op,
            left: dup_subtree(left, pool),
            right: dup_subtree(right, pool),
        },
        TreeNode::Freed => panic!("dup_subtree: freed node in tree"),
    };
    pool.alloc(node)
}

/// One flattened member: the operator that connected a terminal to its
/// parent, and the terminal itself.
#[derive(Debug)]
pub struct FlatItem {
    pub op: BinaryOp,
    pub tree: Box<TreeNode>,
}

/// In-order flatten, consuming the tree. Each terminal lands in `out`
/// tagged with the operator that connected it; `connect_op` tags the
/// left-most terminal. Binary scaffolding nodes are released to the
/// pool as they are stripped, `Nop` nodes are dropped.
pub fn flatten(mut tp: Box<TreeNode>, connect_op: BinaryOp, pool: &mut NodePool, out: &mut Vec<FlatItem>) {
    let node = mem::replace(&mut *tp, TreeNode::Freed);
    match node {
        terminal @ (TreeNode::Leaf { .. } | TreeNode::Solid(_) | TreeNode::Region(_)) => {
            *tp = terminal;
            out.push(FlatItem { op: connect_op, tree: tp });
        }
        TreeNode::Nop => pool.release(tp),
        TreeNode::Binary { op, left, right } => {
            pool.release(tp);
            flatten(left, connect_op, pool, out);
            flatten(right, op, pool, out);
        }
        TreeNode::Unary { op, .. } => panic!("flatten: operator {op} has no flat form"),
        TreeNode::Freed => panic!("flatten: freed node in tree"),
    }
}

/// Non-consuming flatten: terminals are deep-copied into `out`, the
/// original tree is left untouched.
pub fn flatten_ref(tp: &TreeNode, connect_op: BinaryOp, pool: &mut NodePool, out: &mut Vec<FlatItem>) {
    match tp {
        TreeNode::Leaf { .. } | TreeNode::Solid(_) | TreeNode::Region(_) => {
            out.push(FlatItem { op: connect_op, tree: dup_subtree(tp, pool) });
        }
        TreeNode::Nop => {}
        TreeNode::Binary { op, left, right } => {
            flatten_ref(left, connect_op, pool, out);
            flatten_ref(right, *op, pool, out);
        }
        TreeNode::Unary { op, .. } => panic!("flatten_ref: operator {op} has no flat form"),
        TreeNode::Freed => panic!("flatten_ref: freed node in tree"),
    }
}

/// Left-associative fold of a run of slots, honoring each slot's
/// operator. The first in-use operator is forced to Union, matching
/// the historical interpretation of a leading non-union term.
fn fold_run(slots: &mut [Option<FlatItem>], pool: &mut NodePool) -> Option<Box<TreeNode>> {
    let mut cur: Option<Box<TreeNode>> = None;
    for slot in slots.iter_mut() {
        let Some(item) = slot.take() else { continue };
        cur = Some(match cur {
            None => {
                if item.op != BinaryOp::Union {
                    debug!(op = %item.op, "leading non-union operator ignored");
                }
                item.tree
            }
            Some(acc) => pool.alloc(TreeNode::Binary {
                op: item.op,
                left: acc,
                right: item.tree,
            }),
        });
    }
    cur
}

/// Rebuild a tree from a flat member array, honoring GIFT grouping:
/// each contiguous run of non-Union members is folded first, left to
/// right, and the resulting groups are then joined by Unions. So
/// `A - B - C u D - E - F` builds `(A - B - C) u (D - E - F)`.
///
/// Returns `None` for an empty array; a single member comes back
/// verbatim with no operator node above it.
pub fn build_from_flat(items: Vec<FlatItem>, pool: &mut NodePool) -> Option<Box<TreeNode>> {
    let mut slots: Vec<Option<FlatItem>> = items.into_iter().map(Some).collect();
    let n = slots.len();

    // Group pass: fold every run that ends just before a Union member.
    let mut start = 0;
    for next in 1..n {
        let boundary = slots[next]
            .as_ref()
            .map_or(false, |it| it.op == BinaryOp::Union);
        if !boundary {
            continue;
        }
        if let Some(tree) = fold_run(&mut slots[start..next], pool) {
            slots[start] = Some(FlatItem { op: BinaryOp::Union, tree });
        }
        start = next;
    }
    if start < n {
        if let Some(tree) = fold_run(&mut slots[start..n], pool) {
            slots[start] = Some(FlatItem { op: BinaryOp::Union, tree });
        }
    }

    // Glue the groups together.
    fold_run(&mut slots, pool)
}

// ─────────────────────────────────────────────
// Member visitors and editing helpers
// ─────────────────────────────────────────────

/// Visit every member of a combination tree in file order, with the
/// operator connecting it. `connect_op` tags the left-most member.
pub fn for_each_member<F>(tp: &TreeNode, connect_op: BinaryOp, f: &mut F)
where
    F: FnMut(BinaryOp, &str, Option<&Mat4>),
{
    match tp {
        TreeNode::Leaf { name, matrix } => f(connect_op, name, matrix.as_ref()),
        TreeNode::Nop => {}
        TreeNode::Binary { op, left, right } => {
            for_each_member(left, connect_op, f);
            for_each_member(right, *op, f);
        }
        other => panic!("for_each_member: unexpected node {other:?} in combination tree"),
    }
}

/// Visit every leaf of a combination tree mutably, in LNR order.
pub fn for_each_leaf<F>(tp: &mut TreeNode, f: &mut F)
where
    F: FnMut(&mut TreeNode),
{
    match tp {
        TreeNode::Leaf { .. } => f(tp),
        TreeNode::Nop => {}
        TreeNode::Binary { left, right, .. } => {
            for_each_leaf(left, f);
            for_each_leaf(right, f);
        }
        other => panic!("for_each_leaf: unexpected node {other:?} in combination tree"),
    }
}

/// First leaf whose name matches, searching left before right.
pub fn find_named_leaf<'a>(tp: &'a TreeNode, name: &str) -> Option<&'a TreeNode> {
    match tp {
        TreeNode::Leaf { name: n, .. } if n == name => Some(tp),
        TreeNode::Leaf { .. } | TreeNode::Nop => None,
        TreeNode::Binary { left, right, .. } => {
            find_named_leaf(left, name).or_else(|| find_named_leaf(right, name))
        }
        other => panic!("find_named_leaf: unexpected node {other:?} in combination tree"),
    }
}

/// Compose `mat` onto the left of one named member's matrix. Returns
/// false if no such member exists.
pub fn premul_named_leaf(tp: &mut TreeNode, name: &str, mat: &Mat4) -> bool {
    match tp {
        TreeNode::Leaf { name: n, matrix } if n == name => {
            let old = matrix.unwrap_or(Mat4::IDENTITY);
            *matrix = Some(mat.mul(&old));
            true
        }
        TreeNode::Leaf { .. } | TreeNode::Nop => false,
        TreeNode::Binary { left, right, .. } => {
            premul_named_leaf(left, name, mat) || premul_named_leaf(right, name, mat)
        }
        other => panic!("premul_named_leaf: unexpected node {other:?} in combination tree"),
    }
}

fn remove_all(mut tp: Box<TreeNode>, name: &str, pool: &mut NodePool, removed: &mut usize) -> Option<Box<TreeNode>> {
    let node = mem::replace(&mut *tp, TreeNode::Freed);
    match node {
        TreeNode::Leaf { name: n, matrix } if n == name => {
            *removed += 1;
            drop(matrix);
            pool.release(tp);
            None
        }
        TreeNode::Binary { op, left, right } => {
            let left = remove_all(left, name, pool, removed);
            let right = remove_all(right, name, pool, removed);
            match (left, right) {
                (Some(l), Some(r)) => {
                    *tp = TreeNode::Binary { op, left: l, right: r };
                    Some(tp)
                }
                (Some(survivor), None) | (None, Some(survivor)) => {
                    // The operator node goes with the removed member;
                    // the surviving side splices up into its place.
                    pool.release(tp);
                    Some(survivor)
                }
                (None, None) => {
                    pool.release(tp);
                    None
                }
            }
        }
        other @ (TreeNode::Leaf { .. } | TreeNode::Nop) => {
            *tp = other;
            Some(tp)
        }
        other => panic!("remove_named_leaf: unexpected node {other:?} in combination tree"),
    }
}

/// Remove every member with the given name, together with the operator
/// node that referenced it. The resulting tree may not be boolean-
/// equivalent (removing `B` from `A - B` leaves `A`); that is the
/// caller's trade to make. `None` in the slot afterwards means the
/// whole tree was consumed.
pub fn remove_named_leaf(slot: &mut Option<Box<TreeNode>>, name: &str, pool: &mut NodePool) -> Result<usize, DbError> {
    let tp = slot.take().ok_or_else(|| DbError::NotFound(name.to_string()))?;
    let mut removed = 0;
    *slot = remove_all(tp, name, pool, &mut removed);
    if removed == 0 {
        Err(DbError::NotFound(name.to_string()))
    } else {
        Ok(removed)
    }
}
