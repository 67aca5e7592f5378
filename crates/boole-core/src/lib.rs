//! # boole-core
//!
//! Object directory and boolean-tree evaluation core for BooleDB.
//!
//! Provides the named-object catalog and the constructive-geometry
//! tree machinery built on it:
//! - [`directory::Directory`] — hashed catalog of named objects
//! - [`tree::TreeNode`]       — boolean expression tree with a reuse pool
//! - [`db::CsgDb`]            — catalog plus object store plus path resolution
//! - [`algebra`]              — union normal form and region partitioning
//! - [`walk::walk_tree`]      — two-phase parallel region evaluation

pub mod algebra;
pub mod anim;
pub mod comb;
pub mod db;
pub mod directory;
pub mod error;
pub mod matrix;
pub mod model;
pub mod path;
pub mod state;
pub mod store;
pub mod tree;
pub mod walk;

pub use anim::{AnimEffect, AnimOverride, AnimRegistry, MatrixOp, ShaderOp};
pub use comb::{Combination, Member};
pub use db::{AttrMatch, CsgDb, RefEvent};
pub use directory::{ChangeAction, Directory, Lookup};
pub use error::{DbError, WalkError};
pub use matrix::Mat4;
pub use model::{AttrSet, DirFlags, DirectoryEntry, EntryId, SolidRecord, StoreAddr};
pub use path::{DbPath, PathStep};
pub use state::{CombinedState, Material, SoFar, TreeState};
pub use store::{MemStore, ObjectStore};
pub use tree::{BinaryOp, NodePool, SolidHandle, TreeNode, UnaryOp};
pub use walk::{walk_tree, RegionDecision, WalkConfig, WalkHandler, WalkReport};
