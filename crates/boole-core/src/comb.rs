use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::matrix::Mat4;
use crate::model::AttrSet;
use crate::tree::{self, BinaryOp, FlatItem, NodePool, TreeNode};

// ─────────────────────────────────────────────
// Combination payload
// ─────────────────────────────────────────────

/// A decoded combination: a boolean tree over named members plus the
/// material and region description the tree inherits.
///
/// The tree references members by name only; resolution against the
/// directory happens at walk time, so a combination may legally name
/// members that do not (yet) exist.
#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    /// Marks this combination as a region, the unit of evaluation.
    pub region:      bool,
    /// Identification codes; meaningful only when `region` is set.
    pub region_id:   i32,
    pub aircode:     i32,
    pub gift_mater:  i32,
    pub los:         i32,
    /// Color override for everything below, when `rgb_valid` is set.
    pub rgb_valid:   bool,
    pub rgb:         [u8; 3],
    /// Shader name and parameters, carried verbatim.
    pub shader:      String,
    /// Degrees Kelvin; zero or negative means unset.
    pub temperature: f32,
    /// When set, this combination's material locks out overrides from
    /// combinations deeper in the tree.
    pub inherit:     bool,
    pub attrs:       AttrSet,
    /// Boolean tree over member names; `None` is the empty combination.
    pub tree:        Option<Box<TreeNode>>,
}

impl Default for Combination {
    fn default() -> Self {
        Combination {
            region:      false,
            region_id:   0,
            aircode:     0,
            gift_mater:  0,
            los:         0,
            rgb_valid:   false,
            rgb:         [0, 0, 0],
            shader:      String::new(),
            temperature: -1.0,
            inherit:     false,
            attrs:       AttrSet::new(),
            tree:        None,
        }
    }
}

/// One member reference in file order: the operator connecting it to
/// the members before it, the member name, and its matrix. `None`
/// stands for identity, which is elided on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub op:     BinaryOp,
    pub name:   String,
    pub matrix: Option<Mat4>,
}

impl Member {
    pub fn new(op: BinaryOp, name: impl Into<String>) -> Member {
        Member { op, name: name.into(), matrix: None }
    }

    pub fn with_matrix(op: BinaryOp, name: impl Into<String>, matrix: Mat4) -> Member {
        Member { op, name: name.into(), matrix: Some(matrix) }
    }
}

/// On-disk image of a combination: the scalar fields plus the
/// flattened member array. The tree shape is not stored; it is
/// rebuilt from the member order on import.
#[derive(Serialize, Deserialize)]
struct CombRecord {
    region:      bool,
    region_id:   i32,
    aircode:     i32,
    gift_mater:  i32,
    los:         i32,
    rgb_valid:   bool,
    rgb:         [u8; 3],
    shader:      String,
    temperature: f32,
    inherit:     bool,
    attrs:       AttrSet,
    members:     Vec<Member>,
}

impl Combination {
    pub fn new() -> Combination {
        Combination::default()
    }

    /// A region with the given identification code and defaults for
    /// everything else.
    pub fn new_region(region_id: i32) -> Combination {
        Combination { region: true, region_id, los: 100, ..Combination::default() }
    }

    /// Flatten the tree into `(operator, name, matrix)` triples in
    /// file order. Identity matrices are dropped.
    pub fn members(&self) -> Vec<Member> {
        let mut out = Vec::new();
        if let Some(tree) = self.tree.as_deref() {
            tree::for_each_member(tree, BinaryOp::Union, &mut |op, name, matrix| {
                let matrix = matrix.filter(|m| !m.is_identity()).copied();
                out.push(Member { op, name: name.to_string(), matrix });
            });
        }
        out
    }

    /// Replace the tree with one built from `members`, honoring GIFT
    /// grouping: runs of non-union members fold left to right before
    /// the groups are joined by unions.
    pub fn set_members(&mut self, members: &[Member], pool: &mut NodePool) {
        if let Some(old) = self.tree.take() {
            pool.free_tree(old);
        }
        let items: Vec<FlatItem> = members
            .iter()
            .map(|m| FlatItem {
                op:   m.op,
                tree: pool.alloc(TreeNode::Leaf {
                    name:   m.name.clone(),
                    matrix: m.matrix.filter(|mat| !mat.is_identity()),
                }),
            })
            .collect();
        self.tree = tree::build_from_flat(items, pool);
    }

    /// Convenience constructor: the named members joined by unions.
    pub fn union_of<I, S>(names: I, pool: &mut NodePool) -> Combination
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: Vec<Member> = names
            .into_iter()
            .map(|n| Member::new(BinaryOp::Union, n))
            .collect();
        let mut comb = Combination::new();
        comb.set_members(&members, pool);
        comb
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.tree
            .as_deref()
            .map_or(false, |t| tree::find_named_leaf(t, name).is_some())
    }

    /// Serialize for storage.
    pub fn encode(&self) -> Result<Vec<u8>, DbError> {
        let record = CombRecord {
            region:      self.region,
            region_id:   self.region_id,
            aircode:     self.aircode,
            gift_mater:  self.gift_mater,
            los:         self.los,
            rgb_valid:   self.rgb_valid,
            rgb:         self.rgb,
            shader:      self.shader.clone(),
            temperature: self.temperature,
            inherit:     self.inherit,
            attrs:       self.attrs.clone(),
            members:     self.members(),
        };
        Ok(bincode::serialize(&record)?)
    }

    /// Deserialize from storage, rebuilding the member tree with GIFT
    /// grouping. Tree nodes come from `pool`.
    pub fn decode(bytes: &[u8], pool: &mut NodePool) -> Result<Combination, DbError> {
        let record: CombRecord = bincode::deserialize(bytes)?;
        let mut comb = Combination {
            region:      record.region,
            region_id:   record.region_id,
            aircode:     record.aircode,
            gift_mater:  record.gift_mater,
            los:         record.los,
            rgb_valid:   record.rgb_valid,
            rgb:         record.rgb,
            shader:      record.shader,
            temperature: record.temperature,
            inherit:     record.inherit,
            attrs:       record.attrs,
            tree:        None,
        };
        comb.set_members(&record.members, pool);
        Ok(comb)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
