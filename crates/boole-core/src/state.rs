use bitflags::bitflags;
use tracing::warn;

use crate::anim::AnimRegistry;
use crate::comb::Combination;
use crate::directory::{Directory, Lookup};
use crate::error::DbError;
use crate::matrix::Mat4;
use crate::model::{AttrSet, EntryId};
use crate::path::DbPath;
use crate::tree::{BinaryOp, TreeNode};

// ─────────────────────────────────────────────
// Inheritance interlocks and descent flags
// ─────────────────────────────────────────────

/// Direction of material inheritance. `Higher` locks a value against
/// replacement by combinations deeper in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inherit {
    Lower,
    Higher,
}

impl Default for Inherit {
    fn default() -> Self {
        Inherit::Lower
    }
}

impl Inherit {
    fn from_flag(locked: bool) -> Inherit {
        if locked { Inherit::Higher } else { Inherit::Lower }
    }
}

bitflags! {
    /// What kind of territory a descent has passed through so far.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SoFar: u8 {
        /// A region has been opened above this point.
        const REGION = 1 << 0;
        /// This branch is being subtracted away.
        const MINUS  = 1 << 1;
        /// This branch is being intersected.
        const INTER  = 1 << 2;
    }
}

// ─────────────────────────────────────────────
// Accumulated material
// ─────────────────────────────────────────────

/// Material description carried down the tree, with one interlock for
/// color and one shared by shader and temperature.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub color_valid:   bool,
    /// RGB in [0, 1] per channel.
    pub color:         [f32; 3],
    /// Shader name and parameters, verbatim.
    pub shader:        String,
    /// Degrees Kelvin; negative means unset.
    pub temperature:   f32,
    pub color_inherit: Inherit,
    pub mater_inherit: Inherit,
}

impl Default for Material {
    fn default() -> Self {
        Material {
            color_valid:   false,
            color:         [1.0, 1.0, 1.0],
            shader:        String::new(),
            temperature:   -1.0,
            color_inherit: Inherit::Lower,
            mater_inherit: Inherit::Lower,
        }
    }
}

// ─────────────────────────────────────────────
// Tree state
// ─────────────────────────────────────────────

/// Everything a descent accumulates between a tree root and the node
/// being visited: the composed transform, the material, region
/// bookkeeping, and merged attributes.
///
/// States are cheap to clone and the walker clones freely: each child
/// descent gets its own copy, so a branch can never corrupt its
/// siblings.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeState {
    pub matrix:     Mat4,
    pub mater:      Material,
    pub sofar:      SoFar,
    pub region_id:  i32,
    pub aircode:    i32,
    pub gift_mater: i32,
    pub los:        i32,
    pub attrs:      AttrSet,
}

impl Default for TreeState {
    fn default() -> Self {
        TreeState {
            matrix:     Mat4::IDENTITY,
            mater:      Material::default(),
            sofar:      SoFar::empty(),
            region_id:  0,
            aircode:    0,
            gift_mater: 0,
            los:        0,
            attrs:      AttrSet::new(),
        }
    }
}

impl TreeState {
    pub fn new() -> TreeState {
        TreeState::default()
    }

    /// Merge a combination's material and region settings into the
    /// state. Returns true when this combination opens a new region.
    ///
    /// Settings found below an already-open region are discarded: with
    /// a warning on a union branch, silently when the branch is being
    /// subtracted or intersected away (such branches only shape the
    /// geometry, their properties never show).
    pub fn apply_comb(&mut self, path: &DbPath, comb: &Combination) -> bool {
        let in_region = self.sofar.contains(SoFar::REGION);
        let cut_away = self.sofar.intersects(SoFar::MINUS | SoFar::INTER);

        if comb.rgb_valid {
            if in_region {
                if !cut_away {
                    warn!(at = %path, "color override within region, ignored");
                }
            } else if self.mater.color_inherit == Inherit::Lower {
                self.mater.color_valid = true;
                for (chan, byte) in self.mater.color.iter_mut().zip(comb.rgb) {
                    *chan = f32::from(byte) / 255.0;
                }
                self.mater.color_inherit = Inherit::from_flag(comb.inherit);
            }
        }

        if comb.temperature > 0.0 {
            if in_region {
                if !cut_away {
                    warn!(at = %path, "temperature below region, ignored");
                }
            } else if self.mater.mater_inherit == Inherit::Lower {
                // Temperature rides the shader interlock but never
                // locks it.
                self.mater.temperature = comb.temperature;
            }
        }

        if !comb.shader.is_empty() {
            if in_region {
                if !cut_away {
                    warn!(at = %path, "material spec below region, ignored");
                }
            } else if self.mater.mater_inherit == Inherit::Lower {
                self.mater.shader = comb.shader.clone();
                self.mater.mater_inherit = Inherit::from_flag(comb.inherit);
            }
        }

        if comb.region {
            if in_region {
                if !cut_away {
                    warn!(at = %path, "region within region, lower region info ignored");
                }
                // carry on as if this were a plain combination
            } else {
                self.sofar |= SoFar::REGION;
                self.region_id = comb.region_id;
                self.aircode = comb.aircode;
                self.gift_mater = comb.gift_mater;
                self.los = comb.los;
                return true;
            }
        }
        false
    }

    /// Resolve one member leaf: look the name up, extend `path` with
    /// it, run any matching animation overrides, and compose the
    /// member matrix onto the accumulated transform.
    pub fn apply_member(
        &mut self,
        dir: &Directory,
        anims: &AnimRegistry,
        path: &mut DbPath,
        name: &str,
        matrix: Option<&Mat4>,
    ) -> Result<EntryId, DbError> {
        let Some(id) = dir.lookup(name, Lookup::Quiet) else {
            warn!(member = name, at = %path, "member lookup failed");
            return Err(DbError::NotFound(name.to_string()));
        };
        path.push(id, name);

        let mut stack = self.matrix;
        let mut arc = matrix.copied().unwrap_or(Mat4::IDENTITY);
        // Below a region boundary the material is settled; overrides
        // may only move geometry.
        let mater = if self.sofar.contains(SoFar::REGION) {
            None
        } else {
            Some(&mut self.mater)
        };
        anims.apply(path, id, &mut stack, &mut arc, mater);
        self.matrix = stack.mul(&arc);
        Ok(id)
    }

    /// Search a combination tree for the member named `name` and apply
    /// exactly that leaf's state, accounting for the operators crossed
    /// on the way to it. `Ok(true)` means found and applied.
    pub fn apply_one_member(
        &mut self,
        dir: &Directory,
        anims: &AnimRegistry,
        path: &mut DbPath,
        tree: &TreeNode,
        name: &str,
        sofar: SoFar,
    ) -> Result<bool, DbError> {
        match tree {
            TreeNode::Leaf { name: leaf, matrix } => {
                if leaf != name {
                    return Ok(false);
                }
                self.sofar |= sofar;
                self.apply_member(dir, anims, path, name, matrix.as_ref())?;
                Ok(true)
            }
            TreeNode::Nop => Ok(false),
            TreeNode::Binary { op, left, right } => {
                if self.apply_one_member(dir, anims, path, left, name, sofar)? {
                    return Ok(true);
                }
                let sofar = match op {
                    BinaryOp::Subtract => sofar | SoFar::MINUS,
                    BinaryOp::Intersect => sofar | SoFar::INTER,
                    _ => sofar,
                };
                self.apply_one_member(dir, anims, path, right, name, sofar)
            }
            TreeNode::Unary { child, .. } => {
                self.apply_one_member(dir, anims, path, child, name, sofar)
            }
            other => panic!("apply_one_member: unexpected node {other:?} in combination tree"),
        }
    }
}

// ─────────────────────────────────────────────
// Combined state snapshots
// ─────────────────────────────────────────────

/// Frozen [`TreeState`] plus the full path that reached it, recorded
/// where a descent crosses a region boundary. Phase two resumes from
/// these snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedState {
    pub state: TreeState,
    pub path:  DbPath,
}

impl CombinedState {
    pub fn new(state: &TreeState, path: &DbPath) -> CombinedState {
        CombinedState { state: state.clone(), path: path.clone() }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
