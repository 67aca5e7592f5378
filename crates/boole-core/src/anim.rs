use dashmap::DashMap;

use crate::error::DbError;
use crate::matrix::Mat4;
use crate::model::EntryId;
use crate::path::DbPath;
use crate::state::{Inherit, Material, TreeState};

// ─────────────────────────────────────────────
// Override effects
// ─────────────────────────────────────────────

/// How a matrix override combines with the matrices already in play.
/// `stack` is the transform accumulated above the arc, `arc` is the
/// member matrix of the arc itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixOp {
    /// Replace the accumulated stack, keep the arc.
    ReplaceStack,
    /// Replace the arc matrix.
    ReplaceArc,
    /// Replace the stack and reset the arc to identity.
    ReplaceBoth,
    /// Multiply onto the left of the arc.
    LeftMul,
    /// Multiply onto the right of the arc.
    RightMul,
}

/// How a shader override combines with the shader already inherited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderOp {
    Replace,
    Append,
}

/// One temporary override. Overrides never touch stored payloads;
/// they are applied on the fly as a walk crosses their arc.
#[derive(Debug, Clone, PartialEq)]
pub enum AnimEffect {
    Matrix { op: MatrixOp, matrix: Mat4 },
    Shader { op: ShaderOp, shader: String },
    Color { rgb: [u8; 3] },
    Temperature { degrees: f32 },
}

/// An override plus the path it binds to. The path is matched
/// right to left against the walker's current position, so a short
/// path like `/wheel/hub` fires on every occurrence of that arc
/// anywhere in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimOverride {
    pub path:   DbPath,
    pub effect: AnimEffect,
}

fn tail_matches(over: &DbPath, current: &DbPath) -> bool {
    over.steps()
        .iter()
        .rev()
        .zip(current.steps().iter().rev())
        .all(|(o, c)| o.id == c.id)
}

/// Apply one effect to the matrix pair, and to the material when one
/// is still open for modification.
fn run_effect(effect: &AnimEffect, stack: &mut Mat4, arc: &mut Mat4, mater: Option<&mut Material>) {
    match effect {
        AnimEffect::Matrix { op, matrix } => match op {
            MatrixOp::ReplaceStack => *stack = *matrix,
            MatrixOp::ReplaceArc => *arc = *matrix,
            MatrixOp::ReplaceBoth => {
                *stack = *matrix;
                *arc = Mat4::IDENTITY;
            }
            MatrixOp::LeftMul => *arc = matrix.mul(arc),
            MatrixOp::RightMul => *arc = arc.mul(matrix),
        },
        AnimEffect::Shader { op, shader } => {
            if let Some(mater) = mater {
                match op {
                    ShaderOp::Replace => mater.shader = shader.clone(),
                    ShaderOp::Append => {
                        if !mater.shader.is_empty() {
                            mater.shader.push(' ');
                        }
                        mater.shader.push_str(shader);
                    }
                }
                mater.mater_inherit = Inherit::Lower;
            }
        }
        AnimEffect::Color { rgb } => {
            if let Some(mater) = mater {
                mater.color_valid = true;
                for (chan, byte) in mater.color.iter_mut().zip(*rgb) {
                    // center of the byte's quantization band
                    *chan = (f32::from(byte) + 0.5) / 255.0;
                }
                mater.color_inherit = Inherit::Lower;
            }
        }
        AnimEffect::Temperature { degrees } => {
            if let Some(mater) = mater {
                mater.temperature = *degrees;
            }
        }
    }
}

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Registry of live animation overrides.
///
/// Arc overrides hang off the last entry of their path and fire when
/// the walker resolves a member into that entry with a matching path
/// tail. Root overrides hang off the first entry and fire once, when
/// path following starts there.
#[derive(Debug, Default)]
pub struct AnimRegistry {
    per_entry: DashMap<EntryId, Vec<AnimOverride>>,
    roots:     DashMap<EntryId, Vec<AnimOverride>>,
}

impl AnimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an override, anchored at the last entry of its path.
    pub fn add(&self, over: AnimOverride) -> Result<(), DbError> {
        let Some(last) = over.path.last() else {
            return Err(DbError::EmptyPath);
        };
        self.per_entry.entry(last.id).or_default().push(over);
        Ok(())
    }

    /// Register a root override, applied when path following starts
    /// at the first entry of its path.
    pub fn add_root(&self, over: AnimOverride) -> Result<(), DbError> {
        let Some(first) = over.path.first() else {
            return Err(DbError::EmptyPath);
        };
        self.roots.entry(first.id).or_default().push(over);
        Ok(())
    }

    pub fn has_overrides(&self, id: EntryId) -> bool {
        self.per_entry.get(&id).map_or(false, |v| !v.is_empty())
    }

    /// Drop every arc override anchored at `id`.
    pub fn clear_entry(&self, id: EntryId) {
        self.per_entry.remove(&id);
    }

    pub fn clear(&self) {
        self.per_entry.clear();
        self.roots.clear();
    }

    /// Run the overrides anchored at `id` whose path tail matches the
    /// walker's current position. `mater` is `None` once a region has
    /// fixed the material.
    pub fn apply(
        &self,
        current: &DbPath,
        id: EntryId,
        stack: &mut Mat4,
        arc: &mut Mat4,
        mut mater: Option<&mut Material>,
    ) {
        let Some(overrides) = self.per_entry.get(&id) else { return };
        for over in overrides.iter() {
            if tail_matches(&over.path, current) {
                run_effect(&over.effect, stack, arc, mater.as_deref_mut());
            }
        }
    }

    /// Run the root overrides for `first`, folding their effect into
    /// `state` as if they decorated an arc above the root.
    pub fn apply_roots(&self, first: EntryId, state: &mut TreeState) {
        let Some(overrides) = self.roots.get(&first) else { return };
        for over in overrides.iter() {
            let mut stack = state.matrix;
            let mut arc = Mat4::IDENTITY;
            run_effect(&over.effect, &mut stack, &mut arc, Some(&mut state.mater));
            state.matrix = stack.mul(&arc);
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn path(ids: &[u32]) -> DbPath {
        let mut p = DbPath::new();
        for &id in ids {
            p.push(EntryId(id), format!("e{id}"));
        }
        p
    }

    fn matrix_override(ids: &[u32], op: MatrixOp, matrix: Mat4) -> AnimOverride {
        AnimOverride { path: path(ids), effect: AnimEffect::Matrix { op, matrix } }
    }

    #[test]
    fn empty_paths_are_rejected() {
        let reg = AnimRegistry::new();
        let over = matrix_override(&[], MatrixOp::ReplaceArc, Mat4::IDENTITY);
        assert!(matches!(reg.add(over.clone()), Err(DbError::EmptyPath)));
        assert!(matches!(reg.add_root(over), Err(DbError::EmptyPath)));
    }

    #[test]
    fn tail_matching_fires_on_any_occurrence() {
        let reg = AnimRegistry::new();
        let t = Mat4::translation(1.0, 0.0, 0.0);
        reg.add(matrix_override(&[5, 9], MatrixOp::ReplaceArc, t))
            .expect("add");
        assert!(reg.has_overrides(EntryId(9)));

        // Deeper current path with the same two-arc tail still matches.
        let mut stack = Mat4::IDENTITY;
        let mut arc = Mat4::IDENTITY;
        reg.apply(&path(&[1, 5, 9]), EntryId(9), &mut stack, &mut arc, None);
        assert_eq!(arc, t);

        // A different parent arc does not.
        let mut arc = Mat4::IDENTITY;
        reg.apply(&path(&[1, 6, 9]), EntryId(9), &mut stack, &mut arc, None);
        assert_eq!(arc, Mat4::IDENTITY);
    }

    #[test]
    fn longer_override_paths_match_when_the_overlap_agrees() {
        let reg = AnimRegistry::new();
        let t = Mat4::translation(0.0, 2.0, 0.0);
        reg.add(matrix_override(&[1, 5, 9], MatrixOp::ReplaceArc, t))
            .expect("add");

        // Current path shorter than the override path: the shared
        // suffix agrees, so the override fires.
        let mut stack = Mat4::IDENTITY;
        let mut arc = Mat4::IDENTITY;
        reg.apply(&path(&[5, 9]), EntryId(9), &mut stack, &mut arc, None);
        assert_eq!(arc, t);
    }

    #[test]
    fn left_and_right_multiplication_differ() {
        let reg = AnimRegistry::new();
        let t = Mat4::translation(1.0, 0.0, 0.0);
        reg.add(matrix_override(&[7], MatrixOp::LeftMul, t)).expect("add");

        let base = Mat4::translation(0.0, 1.0, 0.0);
        let mut stack = Mat4::IDENTITY;
        let mut arc = base;
        reg.apply(&path(&[7]), EntryId(7), &mut stack, &mut arc, None);
        assert_eq!(arc, t.mul(&base));

        let reg = AnimRegistry::new();
        reg.add(matrix_override(&[7], MatrixOp::RightMul, t)).expect("add");
        let mut arc = base;
        reg.apply(&path(&[7]), EntryId(7), &mut stack, &mut arc, None);
        assert_eq!(arc, base.mul(&t));
    }

    #[test]
    fn replace_both_resets_the_arc() {
        let reg = AnimRegistry::new();
        let t = Mat4::translation(3.0, 0.0, 0.0);
        reg.add(matrix_override(&[2], MatrixOp::ReplaceBoth, t)).expect("add");

        let mut stack = Mat4::translation(9.0, 9.0, 9.0);
        let mut arc = Mat4::translation(1.0, 1.0, 1.0);
        reg.apply(&path(&[2]), EntryId(2), &mut stack, &mut arc, None);
        assert_eq!(stack, t);
        assert_eq!(arc, Mat4::IDENTITY);
    }

    #[test]
    fn material_effects_respect_the_region_gate() {
        let reg = AnimRegistry::new();
        reg.add(AnimOverride {
            path:   path(&[4]),
            effect: AnimEffect::Color { rgb: [255, 0, 0] },
        })
        .expect("add");

        let mut mater = Material::default();
        let mut stack = Mat4::IDENTITY;
        let mut arc = Mat4::IDENTITY;
        reg.apply(&path(&[4]), EntryId(4), &mut stack, &mut arc, Some(&mut mater));
        assert!(mater.color_valid);
        assert!((mater.color[0] - 255.5 / 255.0).abs() < 1.0e-6);

        // Inside a region the material slot is withheld and the
        // effect must degrade to a matrix-only no-op.
        let before = (stack, arc);
        reg.apply(&path(&[4]), EntryId(4), &mut stack, &mut arc, None);
        assert_eq!((stack, arc), before);
    }

    #[test]
    fn shader_append_spaces_the_parts() {
        let mut mater = Material { shader: "plastic".to_string(), ..Material::default() };
        let effect = AnimEffect::Shader { op: ShaderOp::Append, shader: "sh=8".to_string() };
        let mut stack = Mat4::IDENTITY;
        let mut arc = Mat4::IDENTITY;
        run_effect(&effect, &mut stack, &mut arc, Some(&mut mater));
        assert_eq!(mater.shader, "plastic sh=8");
    }

    #[test]
    fn root_overrides_fold_into_the_state() {
        let reg = AnimRegistry::new();
        reg.add_root(matrix_override(
            &[3, 8],
            MatrixOp::ReplaceStack,
            Mat4::translation(0.0, 0.0, 4.0),
        ))
        .expect("add_root");

        let mut state = TreeState::new();
        reg.apply_roots(EntryId(3), &mut state);
        assert_eq!(state.matrix, Mat4::translation(0.0, 0.0, 4.0));

        // Anchored at the first arc, not the last.
        let mut other = TreeState::new();
        reg.apply_roots(EntryId(8), &mut other);
        assert_eq!(other.matrix, Mat4::IDENTITY);
    }

    #[test]
    fn clear_entry_drops_only_that_anchor() {
        let reg = AnimRegistry::new();
        reg.add(matrix_override(&[1], MatrixOp::ReplaceArc, Mat4::IDENTITY))
            .expect("add");
        reg.add(matrix_override(&[2], MatrixOp::ReplaceArc, Mat4::IDENTITY))
            .expect("add");
        reg.clear_entry(EntryId(1));
        assert!(!reg.has_overrides(EntryId(1)));
        assert!(reg.has_overrides(EntryId(2)));
        reg.clear();
        assert!(!reg.has_overrides(EntryId(2)));
    }
}
