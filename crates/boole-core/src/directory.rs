use std::fmt;

use tracing::warn;

use crate::error::DbError;
use crate::model::{DirFlags, DirectoryEntry, EntryId, StoreAddr};

// ─────────────────────────────────────────────
// Name hashing
// ─────────────────────────────────────────────

/// Bucket count. Must stay a power of two so the hash folds with a
/// mask.
pub const NHASH: usize = 1024;

/// Position-weighted character sum, folded into the bucket count.
/// Weighting by position spreads families of names that share a
/// common prefix.
fn dir_hash(name: &str) -> usize {
    let mut sum: u64 = 0;
    for (i, byte) in name.bytes().enumerate() {
        sum += u64::from(byte) * (i as u64 + 1);
    }
    (sum as usize) & (NHASH - 1)
}

// ─────────────────────────────────────────────
// Change notification
// ─────────────────────────────────────────────

/// What a directory change observer is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// Entry was just added, possibly under a renamed name.
    Added,
    /// Entry is about to be removed and is still fully intact.
    AboutToRemove,
}

type ChangeCallback = Box<dyn Fn(&DirectoryEntry, ChangeAction) + Send + Sync>;

/// Whether a failed lookup warrants a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Quiet,
    Noisy,
}

// ─────────────────────────────────────────────
// The directory
// ─────────────────────────────────────────────

/// Name catalog of the database: every object, solid or combination,
/// has exactly one entry here.
///
/// Entries live in a slab indexed by [`EntryId`]; deleted slots go on
/// a free list and are recycled by later adds, so a held id is valid
/// until its entry is deleted. Name resolution runs through fixed
/// hash buckets of singly linked chains.
pub struct Directory {
    slab:      Vec<Option<DirectoryEntry>>,
    free:      Vec<EntryId>,
    buckets:   Vec<Option<EntryId>>,
    live:      usize,
    callbacks: Vec<ChangeCallback>,
}

impl Default for Directory {
    fn default() -> Self {
        Directory::new()
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("live", &self.live)
            .field("slots", &self.slab.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Directory {
    pub fn new() -> Directory {
        Directory {
            slab:      Vec::new(),
            free:      Vec::new(),
            buckets:   vec![None; NHASH],
            live:      0,
            callbacks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Resolve a name to its entry. A name containing `/` resolves as
    /// a path instead: every component must exist, and the terminal
    /// component's entry is returned.
    pub fn lookup(&self, name: &str, mode: Lookup) -> Option<EntryId> {
        if name.contains('/') {
            return self.lookup_path(name, mode);
        }
        let id = self.lookup_flat(name);
        if id.is_none() && mode == Lookup::Noisy {
            warn!(name, "lookup failed: no such object");
        }
        id
    }

    /// Chain scan with a two-character prefix reject ahead of the full
    /// string compare.
    fn lookup_flat(&self, name: &str) -> Option<EntryId> {
        let probe = name.as_bytes();
        let p0 = probe.first().copied();
        let p1 = probe.get(1).copied();

        let mut cursor = self.buckets[dir_hash(name)];
        while let Some(id) = cursor {
            let entry = self.chain_entry(id);
            let held = entry.name.as_bytes();
            if held.first().copied() == p0 && held.get(1).copied() == p1 && entry.name == name {
                return Some(id);
            }
            cursor = entry.next;
        }
        None
    }

    fn lookup_path(&self, path: &str, mode: Lookup) -> Option<EntryId> {
        let mut terminal = None;
        for comp in path.split('/').filter(|c| !c.is_empty()) {
            match self.lookup_flat(comp) {
                Some(id) => terminal = Some(id),
                None => {
                    if mode == Lookup::Noisy {
                        warn!(component = comp, path, "path lookup failed: no such object");
                    }
                    return None;
                }
            }
        }
        terminal
    }

    /// Add a named object, creating its catalog entry.
    ///
    /// A name collision is resolved by renaming the newcomer with an
    /// `A_` through `Z_` prefix, first free letter wins; when all 26
    /// are taken the add fails. Callers that care about the final
    /// name should read it back through the returned id.
    pub fn add(
        &mut self,
        name: &str,
        addr: StoreAddr,
        flags: DirFlags,
        major_type: u8,
        minor_type: u8,
    ) -> Result<EntryId, DbError> {
        if name.is_empty() {
            return Err(DbError::EmptyName);
        }
        if name.contains('/') {
            return Err(DbError::SeparatorInName(name.to_string()));
        }
        let name = if self.lookup_flat(name).is_none() {
            name.to_string()
        } else {
            self.rename_duplicate(name)?
        };

        let entry = DirectoryEntry {
            name,
            addr,
            flags,
            major_type,
            minor_type,
            nref: 0,
            in_mem: None,
            user: None,
            next: None,
        };
        let id = self.link_in(entry);
        self.live += 1;
        self.notify(id, ChangeAction::Added);
        Ok(id)
    }

    fn rename_duplicate(&self, name: &str) -> Result<String, DbError> {
        for letter in b'A'..=b'Z' {
            let candidate = format!("{}_{name}", letter as char);
            if self.lookup_flat(&candidate).is_none() {
                warn!(old = name, new = %candidate, "duplicate name renamed");
                return Ok(candidate);
            }
        }
        Err(DbError::NamesExhausted(name.to_string()))
    }

    /// Remove an entry. Observers see it while it is still intact.
    pub fn delete(&mut self, id: EntryId) -> Result<(), DbError> {
        if self.get(id).is_none() {
            return Err(DbError::StaleHandle);
        }
        self.notify(id, ChangeAction::AboutToRemove);
        self.unlink(id);
        self.slab[id.index()] = None;
        self.free.push(id);
        self.live -= 1;
        Ok(())
    }

    /// Rename an entry in place, rehoming it to the new name's bucket.
    /// Unlike delete-then-add this fires no change callbacks and the
    /// id stays valid. Renaming onto an existing name fails.
    pub fn rename(&mut self, id: EntryId, new_name: &str) -> Result<(), DbError> {
        if new_name.is_empty() {
            return Err(DbError::EmptyName);
        }
        if new_name.contains('/') {
            return Err(DbError::SeparatorInName(new_name.to_string()));
        }
        if self.get(id).is_none() {
            return Err(DbError::StaleHandle);
        }
        if let Some(existing) = self.lookup_flat(new_name) {
            if existing == id {
                return Ok(());
            }
            return Err(DbError::DuplicateName(new_name.to_string()));
        }
        self.unlink(id);
        self.live_entry_mut(id).name = new_name.to_string();
        self.relink(id);
        Ok(())
    }

    pub fn get(&self, id: EntryId) -> Option<&DirectoryEntry> {
        self.slab.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut DirectoryEntry> {
        self.slab.get_mut(id.index()).and_then(|slot| slot.as_mut())
    }

    /// Like [`Directory::get`] but a stale handle is an error.
    pub fn entry(&self, id: EntryId) -> Result<&DirectoryEntry, DbError> {
        self.get(id).ok_or(DbError::StaleHandle)
    }

    /// All live entries in slab order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &DirectoryEntry)> {
        self.slab
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (EntryId(i as u32), e)))
    }

    /// Register a change observer. Observers run synchronously inside
    /// add and delete, in registration order.
    pub fn on_change<F>(&mut self, callback: F)
    where
        F: Fn(&DirectoryEntry, ChangeAction) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    // ── chain plumbing ──

    fn chain_entry(&self, id: EntryId) -> &DirectoryEntry {
        match self.slab[id.index()].as_ref() {
            Some(entry) => entry,
            None => unreachable!("hash chain references freed slot {}", id.index()),
        }
    }

    fn live_entry_mut(&mut self, id: EntryId) -> &mut DirectoryEntry {
        match self.slab[id.index()].as_mut() {
            Some(entry) => entry,
            None => unreachable!("live entry expected in slot {}", id.index()),
        }
    }

    fn link_in(&mut self, mut entry: DirectoryEntry) -> EntryId {
        let bucket = dir_hash(&entry.name);
        entry.next = self.buckets[bucket];
        let id = match self.free.pop() {
            Some(id) => {
                self.slab[id.index()] = Some(entry);
                id
            }
            None => {
                let id = EntryId(self.slab.len() as u32);
                self.slab.push(Some(entry));
                id
            }
        };
        self.buckets[bucket] = Some(id);
        id
    }

    fn relink(&mut self, id: EntryId) {
        let bucket = dir_hash(&self.chain_entry(id).name);
        let head = self.buckets[bucket];
        self.live_entry_mut(id).next = head;
        self.buckets[bucket] = Some(id);
    }

    fn unlink(&mut self, id: EntryId) {
        let bucket = dir_hash(&self.chain_entry(id).name);
        let target_next = self.chain_entry(id).next;

        if self.buckets[bucket] == Some(id) {
            self.buckets[bucket] = target_next;
            return;
        }
        let mut cursor = self.buckets[bucket];
        while let Some(cur) = cursor {
            let next = self.chain_entry(cur).next;
            if next == Some(id) {
                self.live_entry_mut(cur).next = target_next;
                return;
            }
            cursor = next;
        }
        unreachable!("entry missing from its hash chain");
    }

    fn notify(&self, id: EntryId, action: ChangeAction) {
        if self.callbacks.is_empty() {
            return;
        }
        let entry = self.chain_entry(id);
        for callback in &self.callbacks {
            callback(entry, action);
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
