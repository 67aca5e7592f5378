use std::fmt;

use tracing::{debug, info, warn};

use crate::anim::AnimRegistry;
use crate::comb::Combination;
use crate::directory::{Directory, Lookup};
use crate::error::DbError;
use crate::matrix::Mat4;
use crate::model::{
    AttrSet, DirFlags, EntryId, ObjectInternal, SolidRecord, StoreAddr, MAJOR_GEOMETRY,
};
use crate::path::DbPath;
use crate::state::{SoFar, TreeState};
use crate::store::{MemStore, ObjectStore};
use crate::tree::{BinaryOp, NodePool};

// ─────────────────────────────────────────────
// Reference sweep events
// ─────────────────────────────────────────────

/// One event in the reference-count sweep stream.
///
/// Real events carry a parent combination and one of its members;
/// the sweep itself is bracketed by two boundary events with every
/// entry field empty, a union-tagged one before the first real event
/// and a subtract-tagged one after the last.
#[derive(Debug, Clone, Copy)]
pub struct RefEvent<'a> {
    pub parent: Option<EntryId>,
    pub child:  Option<EntryId>,
    pub member: Option<&'a str>,
    pub op:     BinaryOp,
    pub matrix: Option<&'a Mat4>,
}

impl RefEvent<'_> {
    /// Whether this is a sweep boundary rather than a real reference.
    pub fn is_boundary(&self) -> bool {
        self.parent.is_none() && self.child.is_none() && self.member.is_none()
    }
}

type RefCallback = Box<dyn Fn(&RefEvent<'_>) + Send + Sync>;

// ─────────────────────────────────────────────
// Database facade
// ─────────────────────────────────────────────

/// A named-object database: a [`Directory`] catalog over an
/// [`ObjectStore`] payload backend, plus the animation override
/// registry consulted during traversal.
///
/// Payload bytes are opaque to the catalog; the facade decodes them
/// on demand, keyed off the entry flags. Combinations decode to a
/// [`Combination`] with a live boolean tree, everything else to a
/// [`SolidRecord`].
pub struct CsgDb<S: ObjectStore> {
    store:         S,
    dir:           Directory,
    anims:         AnimRegistry,
    ref_callbacks: Vec<RefCallback>,
}

impl<S: ObjectStore + fmt::Debug> fmt::Debug for CsgDb<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsgDb")
            .field("store", &self.store)
            .field("dir", &self.dir)
            .field("anims", &self.anims)
            .field("ref_callbacks", &self.ref_callbacks.len())
            .finish()
    }
}

impl CsgDb<MemStore> {
    /// A database over a fresh in-memory store.
    pub fn in_memory() -> CsgDb<MemStore> {
        CsgDb::new(MemStore::new())
    }
}

impl<S: ObjectStore> CsgDb<S> {
    pub fn new(store: S) -> CsgDb<S> {
        CsgDb {
            store,
            dir: Directory::new(),
            anims: AnimRegistry::new(),
            ref_callbacks: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Directory {
        &self.dir
    }

    pub fn dir_mut(&mut self) -> &mut Directory {
        &mut self.dir
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn anims(&self) -> &AnimRegistry {
        &self.anims
    }

    /// Register an observer for [`sync_references`](Self::sync_references)
    /// sweeps. Observers run synchronously, in registration order.
    pub fn on_ref_event<F>(&mut self, callback: F)
    where
        F: Fn(&RefEvent<'_>) + Send + Sync + 'static,
    {
        self.ref_callbacks.push(Box::new(callback));
    }

    // ── object I/O ──

    /// Raw payload bytes for an entry, preferring the in-memory copy.
    /// An entry with a phantom address and no in-memory payload has
    /// nothing to read.
    pub fn payload(&self, id: EntryId) -> Result<Vec<u8>, DbError> {
        let entry = self.dir.entry(id)?;
        if let Some(bytes) = &entry.in_mem {
            return Ok(bytes.clone());
        }
        match entry.addr {
            StoreAddr::Phony => Err(DbError::PhantomAddress(entry.name.clone())),
            addr @ StoreAddr::Stored { .. } => self.store.read(addr),
        }
    }

    /// Decode an entry's payload into its internal form.
    pub fn get_object(&self, id: EntryId, pool: &mut NodePool) -> Result<ObjectInternal, DbError> {
        let entry = self.dir.entry(id)?;
        let comb = entry.is_comb();
        let bytes = self.payload(id)?;
        if comb {
            Ok(ObjectInternal::Comb(Combination::decode(&bytes, pool)?))
        } else {
            Ok(ObjectInternal::Solid(bincode::deserialize(&bytes)?))
        }
    }

    pub fn get_comb(&self, id: EntryId, pool: &mut NodePool) -> Result<Combination, DbError> {
        let entry = self.dir.entry(id)?;
        if !entry.is_comb() {
            return Err(DbError::NotACombination(entry.name.clone()));
        }
        let bytes = self.payload(id)?;
        Combination::decode(&bytes, pool)
    }

    pub fn get_solid(&self, id: EntryId) -> Result<SolidRecord, DbError> {
        let entry = self.dir.entry(id)?;
        if entry.is_comb() {
            return Err(DbError::NotASolid(entry.name.clone()));
        }
        let bytes = self.payload(id)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Store a solid and catalog it.
    pub fn put_solid(&mut self, name: &str, solid: &SolidRecord) -> Result<EntryId, DbError> {
        let bytes = bincode::serialize(solid)?;
        let addr = self.store.append(&bytes)?;
        self.dir.add(name, addr, DirFlags::SOLID, MAJOR_GEOMETRY, 0)
    }

    /// Store a combination and catalog it, carrying its region flag
    /// into the directory entry.
    pub fn put_comb(&mut self, name: &str, comb: &Combination) -> Result<EntryId, DbError> {
        let bytes = comb.encode()?;
        let addr = self.store.append(&bytes)?;
        self.dir.add(name, addr, comb_flags(comb), MAJOR_GEOMETRY, 0)
    }

    /// Catalog a combination that lives only in memory: phantom store
    /// address, payload held directly on the entry.
    pub fn put_comb_in_mem(&mut self, name: &str, comb: &Combination) -> Result<EntryId, DbError> {
        let bytes = comb.encode()?;
        let flags = comb_flags(comb) | DirFlags::IN_MEM;
        let id = self.dir.add(name, StoreAddr::Phony, flags, MAJOR_GEOMETRY, 0)?;
        let entry = self.dir.get_mut(id).ok_or(DbError::StaleHandle)?;
        entry.in_mem = Some(bytes);
        Ok(id)
    }

    /// Re-encode a combination over an existing entry. In-memory
    /// entries are replaced in place; stored entries append a fresh
    /// payload and move the entry's address to it.
    pub fn update_comb(&mut self, id: EntryId, comb: &Combination) -> Result<(), DbError> {
        let in_mem = {
            let entry = self.dir.entry(id)?;
            if !entry.is_comb() {
                return Err(DbError::NotACombination(entry.name.clone()));
            }
            entry.in_mem.is_some()
        };
        let bytes = comb.encode()?;
        if in_mem {
            let entry = self.dir.get_mut(id).ok_or(DbError::StaleHandle)?;
            entry.in_mem = Some(bytes);
            entry.flags.set(DirFlags::REGION, comb.region);
        } else {
            let addr = self.store.append(&bytes)?;
            let entry = self.dir.get_mut(id).ok_or(DbError::StaleHandle)?;
            entry.addr = addr;
            entry.flags.set(DirFlags::REGION, comb.region);
        }
        Ok(())
    }

    // ── catalog scans ──

    /// Directly referenced children of a combination, in member
    /// order. Members that fail to resolve are skipped.
    pub fn children_of(&self, id: EntryId, pool: &mut NodePool) -> Result<Vec<EntryId>, DbError> {
        let mut comb = self.get_comb(id, pool)?;
        let mut out = Vec::new();
        for member in comb.members() {
            match self.dir.lookup(&member.name, Lookup::Quiet) {
                Some(child) => out.push(child),
                None => debug!(member = %member.name, "unresolved child skipped"),
            }
        }
        if let Some(tree) = comb.tree.take() {
            pool.free_tree(tree);
        }
        Ok(out)
    }

    /// Scan the whole catalog for entries whose flags contain `flags`
    /// and whose payload attributes match `attrs`. Hidden entries and
    /// entries with nothing to read are skipped.
    pub fn lookup_by_attributes(
        &self,
        flags: DirFlags,
        attrs: &AttrSet,
        mode: AttrMatch,
        pool: &mut NodePool,
    ) -> Result<Vec<EntryId>, DbError> {
        let mut out = Vec::new();
        for (id, entry) in self.dir.iter() {
            if entry.is_hidden() {
                continue;
            }
            if matches!(entry.addr, StoreAddr::Phony) && entry.in_mem.is_none() {
                continue;
            }
            if !entry.flags.contains(flags) {
                continue;
            }
            let found = match self.get_object(id, pool) {
                Ok(ObjectInternal::Comb(mut comb)) => {
                    let attrs = std::mem::take(&mut comb.attrs);
                    if let Some(tree) = comb.tree.take() {
                        pool.free_tree(tree);
                    }
                    attrs
                }
                Ok(ObjectInternal::Solid(solid)) => solid.attrs,
                Err(err) => {
                    debug!(name = %entry.name, %err, "unreadable entry skipped in attribute scan");
                    continue;
                }
            };
            let hit = match mode {
                AttrMatch::All => attrs.iter().all(|(k, v)| found.get(k) == Some(v)),
                AttrMatch::Any => attrs.iter().any(|(k, v)| found.get(k) == Some(v)),
            };
            if hit {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Recompute every entry's reference count from scratch: zero
    /// them all, then decode each combination and count each member
    /// reference. Observers registered through
    /// [`on_ref_event`](Self::on_ref_event) see one event per member
    /// between the two boundary events. Unreadable combinations are
    /// reported and skipped, they do not abort the sweep.
    pub fn sync_references(&mut self, pool: &mut NodePool) {
        let begin = RefEvent {
            parent: None,
            child:  None,
            member: None,
            op:     BinaryOp::Union,
            matrix: None,
        };
        for cb in &self.ref_callbacks {
            cb(&begin);
        }

        let ids: Vec<EntryId> = self.dir.iter().map(|(id, _)| id).collect();
        for &id in &ids {
            if let Some(entry) = self.dir.get_mut(id) {
                entry.nref = 0;
            }
        }

        let mut swept = 0usize;
        for &id in &ids {
            let Some(entry) = self.dir.get(id) else { continue };
            if !entry.is_comb() {
                continue;
            }
            let name = entry.name.clone();
            let bytes = match self.payload(id) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(comb = %name, %err, "payload unavailable during reference sweep");
                    continue;
                }
            };
            let mut comb = match Combination::decode(&bytes, pool) {
                Ok(comb) => comb,
                Err(err) => {
                    warn!(comb = %name, %err, "decode failed during reference sweep");
                    continue;
                }
            };
            swept += 1;
            for member in comb.members() {
                let child = self.dir.lookup(&member.name, Lookup::Quiet);
                if let Some(child_id) = child {
                    if let Some(child_entry) = self.dir.get_mut(child_id) {
                        child_entry.nref += 1;
                    }
                }
                let event = RefEvent {
                    parent: Some(id),
                    child,
                    member: Some(member.name.as_str()),
                    op: member.op,
                    matrix: member.matrix.as_ref(),
                };
                for cb in &self.ref_callbacks {
                    cb(&event);
                }
            }
            if let Some(tree) = comb.tree.take() {
                pool.free_tree(tree);
            }
        }

        let end = RefEvent {
            parent: None,
            child:  None,
            member: None,
            op:     BinaryOp::Subtract,
            matrix: None,
        };
        for cb in &self.ref_callbacks {
            cb(&end);
        }
        info!(combinations = swept, "reference counts rebuilt");
    }

    // ── path following ──

    /// Resolve a slash-separated path string against the catalog.
    /// Every missing component is looked up noisily so each one gets
    /// reported; the error names the first.
    pub fn string_to_path(&self, path_str: &str) -> Result<DbPath, DbError> {
        let mut path = DbPath::new();
        let mut missing: Option<String> = None;
        for component in path_str.split('/').filter(|c| !c.is_empty()) {
            match self.dir.lookup(component, Lookup::Noisy) {
                Some(id) => path.push(id, component),
                None => {
                    if missing.is_none() {
                        missing = Some(component.to_string());
                    }
                }
            }
        }
        match missing {
            None => Ok(path),
            Some(name) => Err(DbError::NotFound(name)),
        }
    }

    /// Walk `new_path`, applying combination and member state into
    /// `state` and extending `total` along the way.
    ///
    /// `depth` controls how many arcs of `new_path` are used: `0`
    /// means all of them, `> 0` only that many leading arcs, `< 0`
    /// all but that many trailing arcs. When `total` is empty the
    /// walk is anchored at `new_path`'s first entry and any root
    /// overrides registered for it fold in first; otherwise the walk
    /// continues from `total`'s terminal entry, which must be a
    /// combination referencing `new_path`'s first entry.
    pub fn follow_path(
        &self,
        state: &mut TreeState,
        total: &mut DbPath,
        new_path: &DbPath,
        mode: Lookup,
        pool: &mut NodePool,
        depth: isize,
    ) -> Result<(), DbError> {
        if new_path.is_empty() {
            return Ok(());
        }
        let last = if depth < 0 {
            let d = new_path.len() as isize - 1 + depth;
            if d < 0 {
                panic!("follow_path: depth {depth} exceeds provided path");
            }
            d as usize
        } else if depth == 0 || depth as usize >= new_path.len() {
            new_path.len() - 1
        } else {
            depth as usize
        };

        let mut j = 0;
        let mut comb_id = match total.last() {
            Some(step) => step.id,
            None => {
                let first = &new_path.steps()[0];
                self.anims.apply_roots(first.id, state);
                total.push(first.id, first.name.clone());
                if !self.dir.entry(first.id)?.is_comb() {
                    return self.finish_leaf(total, new_path, 0, mode);
                }
                j = 1;
                first.id
            }
        };

        while j <= last {
            let step = &new_path.steps()[j];
            let comb_name = {
                let entry = self.dir.entry(comb_id)?;
                if !entry.is_comb() {
                    warn!(name = %entry.name, "path component is not a combination");
                    return Err(DbError::NotACombination(entry.name.clone()));
                }
                entry.name.clone()
            };

            let bytes = self.payload(comb_id)?;
            let mut comb = Combination::decode(&bytes, pool)?;
            state.apply_comb(total, &comb);

            // Crawl the tree for the named member; a hit applies its
            // state and pushes its entry onto `total`.
            let found = match comb.tree.as_deref() {
                Some(tree) => state.apply_one_member(
                    &self.dir,
                    &self.anims,
                    total,
                    tree,
                    &step.name,
                    SoFar::empty(),
                )?,
                None => false,
            };
            if let Some(tree) = comb.tree.take() {
                pool.free_tree(tree);
            }
            if !found {
                warn!(member = %step.name, comb = %comb_name, "member state could not be applied");
                return Err(DbError::MemberNotReferenced {
                    comb:   comb_name,
                    member: step.name.clone(),
                });
            }

            if !self.dir.entry(step.id)?.is_comb() {
                return self.finish_leaf(total, new_path, j, mode);
            }
            comb_id = step.id;
            j += 1;
        }
        Ok(())
    }

    fn finish_leaf(
        &self,
        total: &DbPath,
        new_path: &DbPath,
        j: usize,
        mode: Lookup,
    ) -> Result<(), DbError> {
        if j == new_path.len() - 1 {
            return Ok(());
        }
        if matches!(mode, Lookup::Noisy) {
            warn!(at = %total, given = %new_path, "path continues past a leaf object");
        }
        Err(DbError::PathPastLeaf { at: total.to_string() })
    }

    /// [`follow_path`](Self::follow_path) from a path string. An
    /// empty string is a successful no-op.
    pub fn follow_path_for_state(
        &self,
        state: &mut TreeState,
        total: &mut DbPath,
        path_str: &str,
        mode: Lookup,
        pool: &mut NodePool,
    ) -> Result<(), DbError> {
        if path_str.is_empty() {
            return Ok(());
        }
        let new_path = self.string_to_path(path_str)?;
        if new_path.is_empty() {
            return Ok(());
        }
        self.follow_path(state, total, &new_path, mode, pool, 0)
    }

    /// Accumulated transform of a path prefix, computed by following
    /// the path from a fresh state. `depth` as in
    /// [`follow_path`](Self::follow_path).
    pub fn path_to_matrix(
        &self,
        path: &DbPath,
        depth: isize,
        pool: &mut NodePool,
    ) -> Result<Mat4, DbError> {
        let mut state = TreeState::new();
        let mut scratch = DbPath::new();
        self.follow_path(&mut state, &mut scratch, path, Lookup::Noisy, pool, depth)?;
        Ok(state.matrix)
    }
}

/// Attribute matching mode for catalog scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrMatch {
    /// Every queried attribute must match.
    All,
    /// At least one queried attribute must match.
    Any,
}

fn comb_flags(comb: &Combination) -> DirFlags {
    if comb.region {
        DirFlags::COMB | DirFlags::REGION
    } else {
        DirFlags::COMB
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
