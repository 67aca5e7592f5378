use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::matrix::Mat4;

// ─────────────────────────────────────────────
// Directory entry
// ─────────────────────────────────────────────

bitflags! {
    /// Classification bits of a directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirFlags: u32 {
        /// Object payload is a combination (boolean tree over members).
        const COMB   = 1 << 0;
        /// Object payload is a primitive solid.
        const SOLID  = 1 << 1;
        /// Combination is flagged as a region.
        const REGION = 1 << 2;
        /// Hidden from plain directory scans.
        const HIDDEN = 1 << 3;
        /// Payload lives in the entry itself, not in the store.
        const IN_MEM = 1 << 4;
    }
}

/// Stable handle to a directory entry. Handles index a slab that never
/// relocates live entries, so a handle stays valid until its entry is
/// deleted (deleted slots are recycled by later adds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) u32);

impl EntryId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where an entry's payload bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAddr {
    /// No backing payload. Entries created for bookkeeping only; scans
    /// and walks skip them.
    Phony,
    /// Byte range in the object store.
    Stored { offset: u64, len: usize },
}

/// Major type tag: where the payload format is defined.
pub const MAJOR_GEOMETRY: u8 = 0;
pub const MAJOR_BINARY: u8 = 1;

/// The catalog record for one named object, independent of its payload.
pub struct DirectoryEntry {
    pub name: String,
    pub addr: StoreAddr,
    pub flags: DirFlags,
    pub major_type: u8,
    pub minor_type: u8,
    /// Number of combinations referencing this entry. Recomputed by the
    /// full-database sweep, never maintained incrementally.
    pub nref: u64,
    /// Payload bytes for `IN_MEM` entries.
    pub in_mem: Option<Vec<u8>>,
    /// Opaque per-entry slot for client layers.
    pub user: Option<Box<dyn Any + Send + Sync>>,
    /// Next entry in this hash bucket's chain.
    pub(crate) next: Option<EntryId>,
}

impl DirectoryEntry {
    #[inline]
    pub fn is_comb(&self) -> bool {
        self.flags.contains(DirFlags::COMB)
    }

    #[inline]
    pub fn is_solid(&self) -> bool {
        self.flags.contains(DirFlags::SOLID)
    }

    #[inline]
    pub fn is_region(&self) -> bool {
        self.flags.contains(DirFlags::REGION)
    }

    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.flags.contains(DirFlags::HIDDEN)
    }
}

/// Equality covers the record's value fields; the `user` slot is
/// opaque (`dyn Any`) and `next` is hash-chain bookkeeping, so neither
/// participates.
impl PartialEq for DirectoryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.addr == other.addr
            && self.flags == other.flags
            && self.major_type == other.major_type
            && self.minor_type == other.minor_type
            && self.nref == other.nref
            && self.in_mem == other.in_mem
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("flags", &self.flags)
            .field("nref", &self.nref)
            .field("user", &self.user.as_ref().map(|_| "<set>"))
            .finish()
    }
}

// ─────────────────────────────────────────────
// Decoded object payloads
// ─────────────────────────────────────────────

/// Attribute set attached to an object: plain name -> value pairs.
pub type AttrSet = BTreeMap<String, String>;

/// A decoded primitive solid.
///
/// The tree engine never interprets `params`; it only carries them to
/// the leaf callback together with the transform accumulated on the
/// path down to the solid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolidRecord {
    /// Primitive type name, e.g. "arb8", "sph".
    pub kind: String,
    pub params: Vec<f64>,
    /// Accumulated model-to-solid transform, identity as stored.
    pub xform: Mat4,
    pub attrs: AttrSet,
}

impl SolidRecord {
    pub fn new(kind: impl Into<String>, params: Vec<f64>) -> Self {
        SolidRecord {
            kind: kind.into(),
            params,
            xform: Mat4::IDENTITY,
            attrs: AttrSet::new(),
        }
    }
}

/// A decoded object: the only discriminant the core itself inspects is
/// solid vs. combination.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectInternal {
    Solid(SolidRecord),
    Comb(crate::comb::Combination),
}

impl ObjectInternal {
    #[inline]
    pub fn is_comb(&self) -> bool {
        matches!(self, ObjectInternal::Comb(_))
    }
}
