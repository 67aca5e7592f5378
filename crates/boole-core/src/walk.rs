//! Two-phase parallel walker over the object graph.
//!
//! Gathering descends from named roots and freezes a snapshot wherever
//! a region boundary is crossed. The combined forest is then pushed
//! into union normal form and split into independent per-region
//! subtrees, which workers claim and evaluate concurrently.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::{debug, warn};

use crate::algebra::{extract_regions, non_union_push};
use crate::comb::Combination;
use crate::db::CsgDb;
use crate::directory::Lookup;
use crate::error::WalkError;
use crate::model::{SolidRecord, StoreAddr};
use crate::path::DbPath;
use crate::state::{CombinedState, SoFar, TreeState};
use crate::store::ObjectStore;
use crate::tree::{BinaryOp, NodePool, TreeNode};

// ─────────────────────────────────────────────
// Handler interface
// ─────────────────────────────────────────────

/// Verdict of a [`WalkHandler::region_start`] hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionDecision {
    /// Keep the region; it will be evaluated.
    Accept,
    /// Drop the region and everything below it.
    Reject,
}

/// Client hooks driving a [`walk_tree`] pass.
///
/// `region_start` fires during gathering, once per region boundary
/// crossed. `leaf` and `region_end` fire during evaluation, possibly
/// from several worker threads at once, so implementations synchronize
/// any shared state themselves.
pub trait WalkHandler: Sync {
    /// Inspect a region as gathering reaches it. Returning
    /// [`RegionDecision::Reject`] prunes the region before any of its
    /// solids are touched.
    fn region_start(
        &self,
        _state: &TreeState,
        _path: &DbPath,
        _comb: &Combination,
    ) -> RegionDecision {
        RegionDecision::Accept
    }

    /// Receive one region's fully evaluated tree. Whatever is returned
    /// goes back into the region's slot and is freed when the walk
    /// finishes; return `None` to keep ownership of the tree.
    fn region_end(
        &self,
        state: &TreeState,
        path: &DbPath,
        tree: Box<TreeNode>,
        pool: &mut NodePool,
    ) -> Option<Box<TreeNode>>;

    /// Turn one primitive solid into a tree node. The record arrives
    /// with the path transform already composed onto its own. `None`
    /// prunes the leaf.
    fn leaf(
        &self,
        state: &TreeState,
        path: &DbPath,
        solid: SolidRecord,
        pool: &mut NodePool,
    ) -> Option<Box<TreeNode>>;
}

// ─────────────────────────────────────────────
// Configuration and report
// ─────────────────────────────────────────────

/// Tuning knobs for [`walk_tree`].
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Worker threads for region evaluation. Each worker owns a node
    /// pool; regions are claimed from a shared counter.
    pub workers: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        WalkConfig { workers: num_cpus() }
    }
}

fn num_cpus() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// What a completed walk covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkReport {
    /// Roots that could not be resolved to a starting point.
    pub not_found: usize,
    /// Regions handed to the evaluation phase.
    pub regions:   usize,
}

// ─────────────────────────────────────────────
// Descent
// ─────────────────────────────────────────────

/// Which phase a descent serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescentMode {
    /// Stop at region boundaries and record snapshots.
    Gather,
    /// Resume below a snapshot and resolve every leaf.
    Evaluate,
}

/// Resolve the object at the tip of `path` into a boolean tree.
///
/// Combinations recurse through their members; solids go to the leaf
/// handler (evaluating) or freeze into snapshots (gathering). `None`
/// prunes the branch, with the reason already logged.
fn descend<S, H>(
    db: &CsgDb<S>,
    handler: &H,
    state: &TreeState,
    path: &mut DbPath,
    mode: DescentMode,
    region_start: &mut Option<Box<CombinedState>>,
    pool: &mut NodePool,
) -> Option<Box<TreeNode>>
where
    S: ObjectStore,
    H: WalkHandler,
{
    let Some(step) = path.last() else {
        warn!("descent reached an empty path");
        return None;
    };
    let id = step.id;
    let entry = match db.dir().entry(id) {
        Ok(entry) => entry,
        Err(err) => {
            warn!(at = %path, error = %err, "dangling path entry");
            return None;
        }
    };
    if entry.addr == StoreAddr::Phony && entry.in_mem.is_none() {
        debug!(name = %entry.name, "phony entry, skipped");
        return None;
    }

    if entry.is_comb() {
        let mut comb = match db.get_comb(id, pool) {
            Ok(comb) => comb,
            Err(err) => {
                warn!(name = %entry.name, error = %err, "combination import failed");
                return None;
            }
        };
        let mut nts = state.clone();
        let is_region = nts.apply_comb(path, &comb);
        if is_region {
            // Raw attribute pairs ride the region state; the opening
            // combination's own pairs win on collision.
            for (key, value) in &comb.attrs {
                nts.attrs.insert(key.clone(), value.clone());
            }
            match mode {
                DescentMode::Gather => {
                    let decision = handler.region_start(&nts, path, &comb);
                    if let Some(tree) = comb.tree.take() {
                        pool.free_tree(tree);
                    }
                    if decision == RegionDecision::Reject {
                        debug!(at = %path, "region rejected by handler");
                        return None;
                    }
                    let snap = CombinedState::new(&nts, path);
                    return Some(pool.alloc(TreeNode::Region(Box::new(snap))));
                }
                DescentMode::Evaluate => {
                    if region_start.is_some() {
                        warn!(at = %path, "region starts while another is open, pruned");
                        if let Some(tree) = comb.tree.take() {
                            pool.free_tree(tree);
                        }
                        return None;
                    }
                    *region_start = Some(Box::new(CombinedState::new(&nts, path)));
                }
            }
        }
        match comb.tree.take() {
            Some(mut tree) => {
                descend_members(db, handler, &nts, path, &mut tree, mode, region_start, pool);
                Some(tree)
            }
            // Empty combination.
            None => Some(pool.alloc(TreeNode::Nop)),
        }
    } else if entry.is_solid() {
        if !state.matrix.preserves_axes() {
            warn!(name = %entry.name, "transform does not preserve axis perpendicularity, pruned");
            return None;
        }
        let mut record = match db.get_solid(id) {
            Ok(record) => record,
            Err(err) => {
                warn!(name = %entry.name, error = %err, "solid import failed");
                return None;
            }
        };
        match mode {
            DescentMode::Gather => {
                let snap = CombinedState::new(state, path);
                Some(pool.alloc(TreeNode::Region(Box::new(snap))))
            }
            DescentMode::Evaluate => {
                if !state.sofar.contains(SoFar::REGION) {
                    // Solid not contained in any region: invent one of
                    // the same name.
                    if region_start.is_some() {
                        warn!(at = %path, "bare solid while a region is open, pruned");
                        return None;
                    }
                    debug!(at = %path, "solid outside any region, inventing one");
                    let mut snap = CombinedState::new(state, path);
                    snap.state.sofar |= SoFar::REGION;
                    *region_start = Some(Box::new(snap));
                }
                record.xform = state.matrix.mul(&record.xform);
                handler.leaf(state, path, record, pool)
            }
        }
    } else {
        warn!(name = %entry.name, "not a drawable object, pruned");
        None
    }
}

/// Resolve every member leaf of a combination tree in place. Member
/// state is re-derived per branch so siblings stay independent;
/// subtraction and intersection mark the branch they cut away.
fn descend_members<S, H>(
    db: &CsgDb<S>,
    handler: &H,
    state: &TreeState,
    path: &mut DbPath,
    tp: &mut TreeNode,
    mode: DescentMode,
    region_start: &mut Option<Box<CombinedState>>,
    pool: &mut NodePool,
) where
    S: ObjectStore,
    H: WalkHandler,
{
    let mut memb_state = state.clone();
    match tp {
        TreeNode::Leaf { name, matrix } => {
            let name = name.clone();
            let matrix = *matrix;
            if memb_state
                .apply_member(db.dir(), db.anims(), path, &name, matrix.as_ref())
                .is_err()
            {
                *tp = TreeNode::Nop;
                return;
            }
            if path.detect_cycle(&name) {
                warn!(at = %path, "circular reference, ignoring this arc");
                path.pop();
                *tp = TreeNode::Nop;
                return;
            }
            match descend(db, handler, &memb_state, path, mode, region_start, pool) {
                Some(mut sub) => {
                    *tp = mem::replace(&mut *sub, TreeNode::Freed);
                    pool.release(sub);
                }
                None => *tp = TreeNode::Nop,
            }
            path.pop();
        }
        TreeNode::Binary { op, left, right } => {
            let op = *op;
            descend_members(db, handler, &memb_state, path, left, mode, region_start, pool);
            match op {
                BinaryOp::Subtract => memb_state.sofar |= SoFar::MINUS,
                BinaryOp::Intersect => memb_state.sofar |= SoFar::INTER,
                _ => {}
            }
            descend_members(db, handler, &memb_state, path, right, mode, region_start, pool);
        }
        TreeNode::Unary { child, .. } => {
            descend_members(db, handler, &memb_state, path, child, mode, region_start, pool);
        }
        TreeNode::Nop => {}
        other @ (TreeNode::Solid(_) | TreeNode::Region(_) | TreeNode::Freed) => {
            panic!("descend_members: evaluation node {other:?} in a combination tree")
        }
    }
}

// ─────────────────────────────────────────────
// Evaluation
// ─────────────────────────────────────────────

/// Replace every snapshot in a partition with its evaluated interior.
///
/// The first snapshot expanded establishes the region's start state;
/// later snapshots in the same partition rejoin that open region
/// instead of opening their own.
fn expand_partition<S, H>(
    db: &CsgDb<S>,
    handler: &H,
    tp: &mut TreeNode,
    region_start: &mut Option<Box<CombinedState>>,
    pool: &mut NodePool,
) where
    S: ObjectStore,
    H: WalkHandler,
{
    match tp {
        TreeNode::Nop => {}
        TreeNode::Region(_) => {
            let TreeNode::Region(snap) = mem::replace(tp, TreeNode::Nop) else {
                unreachable!();
            };
            let CombinedState { mut state, mut path } = *snap;
            if path.is_empty() {
                warn!("region snapshot with an empty path, pruned");
                return;
            }
            if region_start.is_some() {
                state.sofar |= SoFar::REGION;
            } else {
                state.sofar.remove(SoFar::REGION);
            }
            match descend(
                db,
                handler,
                &state,
                &mut path,
                DescentMode::Evaluate,
                region_start,
                pool,
            ) {
                Some(mut sub) => {
                    *tp = mem::replace(&mut *sub, TreeNode::Freed);
                    pool.release(sub);
                }
                None => warn!(at = %path, "region evaluation failed"),
            }
        }
        TreeNode::Unary { child, .. } => {
            expand_partition(db, handler, child, region_start, pool);
        }
        TreeNode::Binary { left, right, .. } => {
            expand_partition(db, handler, left, region_start, pool);
            expand_partition(db, handler, right, region_start, pool);
        }
        other @ (TreeNode::Leaf { .. } | TreeNode::Solid(_) | TreeNode::Freed) => {
            panic!("expand_partition: unexpected node {other:?} in a region skeleton")
        }
    }
}

/// Worker loop: claim the next unevaluated region, expand it, and hand
/// the finished tree to the region end handler. Whatever the handler
/// returns goes back into the slot for final cleanup.
fn dispatch_regions<S, H>(
    db: &CsgDb<S>,
    handler: &H,
    slots: &[Mutex<Option<Box<TreeNode>>>],
    next: &AtomicUsize,
    pool: &mut NodePool,
) where
    S: ObjectStore,
    H: WalkHandler,
{
    loop {
        let cur = next.fetch_add(1, Ordering::SeqCst);
        if cur >= slots.len() {
            break;
        }
        let Some(mut tree) = slots[cur]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            continue;
        };
        let mut region_start = None;
        expand_partition(db, handler, &mut tree, &mut region_start, pool);
        let Some(snap) = region_start else {
            warn!(slot = cur, "region produced no start state, put back");
            *slots[cur].lock().unwrap_or_else(|e| e.into_inner()) = Some(tree);
            continue;
        };
        let leftover = handler.region_end(&snap.state, &snap.path, tree, pool);
        if leftover.is_some() {
            *slots[cur].lock().unwrap_or_else(|e| e.into_inner()) = leftover;
        }
    }
}

// ─────────────────────────────────────────────
// The walk
// ─────────────────────────────────────────────

/// Walk named trees in two phases: gathering freezes a snapshot
/// wherever a descent crosses a region boundary, the combined forest
/// is pushed into union normal form and split into per-region
/// subtrees, then workers claim and evaluate regions until none
/// remain.
///
/// Roots that fail to resolve are counted and skipped; the walk fails
/// only when not a single root resolves.
pub fn walk_tree<S, H>(
    db: &CsgDb<S>,
    roots: &[&str],
    init_state: &TreeState,
    config: &WalkConfig,
    handler: &H,
) -> Result<WalkReport, WalkError>
where
    S: ObjectStore,
    H: WalkHandler,
{
    let workers = config.workers.max(1);
    let mut pools: Vec<NodePool> = (0..workers).map(|_| NodePool::new()).collect();

    let mut not_found = 0usize;
    let mut whole: Option<Box<TreeNode>> = None;
    for root in roots {
        let mut state = init_state.clone();
        let mut path = DbPath::new();
        if let Err(err) =
            db.follow_path_for_state(&mut state, &mut path, root, Lookup::Noisy, &mut pools[0])
        {
            warn!(root = %root, error = %err, "tree root not found");
            not_found += 1;
            continue;
        }
        let mut region_start = None;
        let Some(subtree) = descend(
            db,
            handler,
            &state,
            &mut path,
            DescentMode::Gather,
            &mut region_start,
            &mut pools[0],
        ) else {
            continue;
        };
        whole = Some(match whole.take() {
            None => subtree,
            Some(acc) => pools[0].alloc(TreeNode::Binary {
                op:    BinaryOp::Union,
                left:  acc,
                right: subtree,
            }),
        });
    }
    let Some(mut whole) = whole else {
        return Err(WalkError::NoRootsResolved);
    };

    non_union_push(&mut whole, &mut pools[0]);
    let regions = extract_regions(&mut whole, &mut pools[0]);
    pools[0].free_tree(whole);

    let total = regions.len();
    debug!(regions = total, workers = workers, "evaluating regions");
    let slots: Vec<Mutex<Option<Box<TreeNode>>>> =
        regions.into_iter().map(|tree| Mutex::new(Some(tree))).collect();
    let next = AtomicUsize::new(0);

    if workers == 1 {
        dispatch_regions(db, handler, &slots, &next, &mut pools[0]);
    } else {
        thread::scope(|scope| {
            let slots = &slots;
            let next = &next;
            for pool in pools.iter_mut() {
                scope.spawn(move || dispatch_regions(db, handler, slots, next, pool));
            }
        });
    }

    for slot in &slots {
        if let Some(tree) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pools[0].free_tree(tree);
        }
    }

    if not_found > 0 {
        warn!(count = not_found, "tree roots not found");
    }
    Ok(WalkReport { not_found, regions: total })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;
    use crate::comb::Member;
    use crate::store::MemStore;
    use crate::tree::{leaf_count, SolidHandle};

    /// Records every region it finishes and turns each solid into a
    /// serial-numbered terminal.
    #[derive(Default)]
    struct Collect {
        serial:  AtomicU64,
        regions: Mutex<Vec<(String, usize)>>,
    }

    impl Collect {
        fn sorted(&self) -> Vec<(String, usize)> {
            let mut out = self.regions.lock().unwrap().clone();
            out.sort();
            out
        }
    }

    impl WalkHandler for Collect {
        fn region_end(
            &self,
            state: &TreeState,
            path: &DbPath,
            tree: Box<TreeNode>,
            _pool: &mut NodePool,
        ) -> Option<Box<TreeNode>> {
            assert!(state.sofar.contains(SoFar::REGION));
            self.regions
                .lock()
                .unwrap()
                .push((path.to_string(), leaf_count(&tree)));
            Some(tree)
        }

        fn leaf(
            &self,
            _state: &TreeState,
            path: &DbPath,
            _solid: SolidRecord,
            pool: &mut NodePool,
        ) -> Option<Box<TreeNode>> {
            let name = path.last().map(|step| step.name.clone()).unwrap_or_default();
            let serial = self.serial.fetch_add(1, Ordering::SeqCst);
            Some(pool.alloc(TreeNode::Solid(SolidHandle { name, serial })))
        }
    }

    /// Rejects air regions during gathering, delegates the rest.
    struct SkipAir {
        inner: Collect,
    }

    impl WalkHandler for SkipAir {
        fn region_start(
            &self,
            state: &TreeState,
            _path: &DbPath,
            _comb: &Combination,
        ) -> RegionDecision {
            if state.aircode != 0 {
                RegionDecision::Reject
            } else {
                RegionDecision::Accept
            }
        }

        fn region_end(
            &self,
            state: &TreeState,
            path: &DbPath,
            tree: Box<TreeNode>,
            pool: &mut NodePool,
        ) -> Option<Box<TreeNode>> {
            self.inner.region_end(state, path, tree, pool)
        }

        fn leaf(
            &self,
            state: &TreeState,
            path: &DbPath,
            solid: SolidRecord,
            pool: &mut NodePool,
        ) -> Option<Box<TreeNode>> {
            self.inner.leaf(state, path, solid, pool)
        }
    }

    /// Captures region identification as it arrives at region end.
    #[derive(Default)]
    struct RegionLog {
        rows: Mutex<Vec<(String, i32, i32, Option<String>)>>,
    }

    impl WalkHandler for RegionLog {
        fn region_end(
            &self,
            state: &TreeState,
            path: &DbPath,
            tree: Box<TreeNode>,
            _pool: &mut NodePool,
        ) -> Option<Box<TreeNode>> {
            self.rows.lock().unwrap().push((
                path.to_string(),
                state.region_id,
                state.aircode,
                state.attrs.get("material").cloned(),
            ));
            Some(tree)
        }

        fn leaf(
            &self,
            _state: &TreeState,
            _path: &DbPath,
            _solid: SolidRecord,
            pool: &mut NodePool,
        ) -> Option<Box<TreeNode>> {
            Some(pool.alloc(TreeNode::Nop))
        }
    }

    fn rpp(tag: f64) -> SolidRecord {
        SolidRecord::new("rpp", vec![0.0, tag, 0.0, tag, 0.0, tag])
    }

    fn one_worker() -> WalkConfig {
        WalkConfig { workers: 1 }
    }

    /// Three solids under one plain combination: (a - b) u c.
    fn flat_db() -> (CsgDb<MemStore>, NodePool) {
        let mut db = CsgDb::in_memory();
        let mut pool = NodePool::new();
        db.put_solid("a", &rpp(1.0)).unwrap();
        db.put_solid("b", &rpp(2.0)).unwrap();
        db.put_solid("c", &rpp(3.0)).unwrap();
        let mut top = Combination::new();
        top.set_members(
            &[
                Member::new(BinaryOp::Union, "a"),
                Member::new(BinaryOp::Subtract, "b"),
                Member::new(BinaryOp::Union, "c"),
            ],
            &mut pool,
        );
        db.put_comb("top", &top).unwrap();
        (db, pool)
    }

    /// Two region combinations under a plain top: r1 = s1 - s2 with an
    /// attribute, r2 = s3 flagged as air.
    fn region_db() -> (CsgDb<MemStore>, NodePool) {
        let mut db = CsgDb::in_memory();
        let mut pool = NodePool::new();
        db.put_solid("s1", &rpp(1.0)).unwrap();
        db.put_solid("s2", &rpp(2.0)).unwrap();
        db.put_solid("s3", &rpp(3.0)).unwrap();

        let mut r1 = Combination::new();
        r1.region = true;
        r1.region_id = 100;
        r1.attrs.insert("material".into(), "steel".into());
        r1.set_members(
            &[
                Member::new(BinaryOp::Union, "s1"),
                Member::new(BinaryOp::Subtract, "s2"),
            ],
            &mut pool,
        );
        db.put_comb("r1", &r1).unwrap();

        let mut r2 = Combination::new();
        r2.region = true;
        r2.region_id = 200;
        r2.aircode = 5;
        r2.set_members(&[Member::new(BinaryOp::Union, "s3")], &mut pool);
        db.put_comb("r2", &r2).unwrap();

        let top = Combination::union_of(["r1", "r2"], &mut pool);
        db.put_comb("top", &top).unwrap();
        (db, pool)
    }

    #[test]
    fn plain_combination_splits_into_invented_regions() {
        let (db, _pool) = flat_db();
        let collect = Collect::default();
        let report =
            walk_tree(&db, &["top"], &TreeState::new(), &one_worker(), &collect).unwrap();
        assert_eq!(report, WalkReport { not_found: 0, regions: 2 });
        assert_eq!(
            collect.sorted(),
            vec![("/top/a".to_string(), 2), ("/top/c".to_string(), 1)],
        );
        assert_eq!(collect.serial.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn region_combinations_carry_ident_and_attributes() {
        let (db, _pool) = region_db();
        let log = RegionLog::default();
        let report = walk_tree(&db, &["top"], &TreeState::new(), &one_worker(), &log).unwrap();
        assert_eq!(report.regions, 2);
        let mut rows = log.rows.lock().unwrap().clone();
        rows.sort();
        assert_eq!(
            rows,
            vec![
                ("/top/r1".to_string(), 100, 0, Some("steel".to_string())),
                ("/top/r2".to_string(), 200, 5, None),
            ],
        );
    }

    #[test]
    fn rejected_regions_never_reach_evaluation() {
        let (db, _pool) = region_db();
        let skip = SkipAir { inner: Collect::default() };
        let report = walk_tree(&db, &["top"], &TreeState::new(), &one_worker(), &skip).unwrap();
        assert_eq!(report.regions, 1);
        assert_eq!(skip.inner.sorted(), vec![("/top/r1".to_string(), 2)]);
    }

    #[test]
    fn bare_solid_roots_get_a_region_invented() {
        let (db, _pool) = flat_db();
        let collect = Collect::default();
        let report = walk_tree(&db, &["a"], &TreeState::new(), &one_worker(), &collect).unwrap();
        assert_eq!(report, WalkReport { not_found: 0, regions: 1 });
        assert_eq!(collect.sorted(), vec![("/a".to_string(), 1)]);
    }

    #[test]
    fn self_union_region_is_one_region_with_two_leaves() {
        let mut pool = NodePool::new();
        let mut db = CsgDb::in_memory();
        db.put_solid("box1", &rpp(1.0)).unwrap();
        // Same solid referenced through two distinct members.
        let mut comb1 = Combination::union_of(["box1", "box1"], &mut pool);
        comb1.region = true;
        db.put_comb("comb1", &comb1).unwrap();

        let collect = Collect::default();
        let report =
            walk_tree(&db, &["comb1"], &TreeState::new(), &one_worker(), &collect).unwrap();
        assert_eq!(report.regions, 1);
        assert_eq!(collect.sorted(), vec![("/comb1".to_string(), 2)]);
    }

    #[test]
    fn nested_region_settings_do_not_reopen() {
        let mut db = CsgDb::in_memory();
        let mut pool = NodePool::new();
        db.put_solid("s1", &rpp(1.0)).unwrap();
        let mut inner = Combination::union_of(["s1"], &mut pool);
        inner.region = true;
        inner.region_id = 7;
        db.put_comb("inner", &inner).unwrap();
        let mut outer = Combination::union_of(["inner"], &mut pool);
        outer.region = true;
        outer.region_id = 3;
        db.put_comb("outer", &outer).unwrap();

        let log = RegionLog::default();
        let report = walk_tree(&db, &["outer"], &TreeState::new(), &one_worker(), &log).unwrap();
        assert_eq!(report.regions, 1);
        let rows = log.rows.lock().unwrap().clone();
        assert_eq!(rows, vec![("/outer".to_string(), 3, 0, None)]);
    }

    #[test]
    fn circular_references_resolve_to_empty_branches() {
        let mut db = CsgDb::in_memory();
        let mut pool = NodePool::new();
        db.put_solid("s1", &rpp(1.0)).unwrap();
        db.put_solid("s2", &rpp(2.0)).unwrap();
        // Members may name objects added later; resolution happens at
        // walk time, so the mutual reference below is representable.
        let alpha = Combination::union_of(["beta", "s1"], &mut pool);
        db.put_comb("alpha", &alpha).unwrap();
        let beta = Combination::union_of(["alpha", "s2"], &mut pool);
        db.put_comb("beta", &beta).unwrap();

        let collect = Collect::default();
        let report =
            walk_tree(&db, &["alpha"], &TreeState::new(), &one_worker(), &collect).unwrap();
        assert_eq!(report.regions, 2);
        assert_eq!(
            collect.sorted(),
            vec![("/alpha/beta/s2".to_string(), 1), ("/alpha/s1".to_string(), 1)],
        );
    }

    #[test]
    fn missing_roots_are_counted_without_aborting() {
        let (db, _pool) = flat_db();
        let collect = Collect::default();
        let report = walk_tree(
            &db,
            &["top", "ghost"],
            &TreeState::new(),
            &one_worker(),
            &collect,
        )
        .unwrap();
        assert_eq!(report, WalkReport { not_found: 1, regions: 2 });

        let err = walk_tree(
            &db,
            &["ghost", "wraith"],
            &TreeState::new(),
            &one_worker(),
            &collect,
        )
        .unwrap_err();
        assert!(matches!(err, WalkError::NoRootsResolved));
    }

    #[test]
    fn worker_count_does_not_change_the_result() {
        let mut db = CsgDb::in_memory();
        let mut pool = NodePool::new();
        let mut names = Vec::new();
        for i in 0..8 {
            let solid = format!("s{i}");
            let region = format!("r{i}");
            db.put_solid(&solid, &rpp(i as f64)).unwrap();
            let mut comb = Combination::union_of([solid.as_str()], &mut pool);
            comb.region = true;
            comb.region_id = i as i32 + 1;
            db.put_comb(&region, &comb).unwrap();
            names.push(region);
        }
        let top = Combination::union_of(names.iter().map(String::as_str), &mut pool);
        db.put_comb("top", &top).unwrap();

        let mut seen = Vec::new();
        for workers in [1, 2, 8] {
            let collect = Collect::default();
            let config = WalkConfig { workers };
            let report = walk_tree(&db, &["top"], &TreeState::new(), &config, &collect).unwrap();
            assert_eq!(report.regions, 8);
            seen.push(collect.sorted());
        }
        assert_eq!(seen[0].len(), 8);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(seen[1], seen[2]);
    }
}
