use thiserror::Error;

/// Errors raised by the directory, object store, codec and path layers.
///
/// Everything here is a recoverable data-quality or caller-contract
/// condition. Structural invariant violations (operating on a freed tree
/// node, an unknown operator tag reaching an evaluator) do not travel as
/// values; they panic at the point of detection.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("empty object name rejected")]
    EmptyName,

    #[error("path separator inside name '{0}'")]
    SeparatorInName(String),

    #[error("duplicate object name: {0}")]
    DuplicateName(String),

    #[error("rename prefixes A_ through Z_ exhausted for '{0}'")]
    NamesExhausted(String),

    #[error("stale directory handle")]
    StaleHandle,

    #[error("object '{0}' has no stored payload")]
    PhantomAddress(String),

    #[error("'{0}' is not a combination")]
    NotACombination(String),

    #[error("'{0}' is not a solid")]
    NotASolid(String),

    #[error("member '{member}' is not referenced by combination '{comb}'")]
    MemberNotReferenced { comb: String, member: String },

    #[error("path ended in leaf '{at}', additional components remain")]
    PathPastLeaf { at: String },

    #[error("empty path rejected")]
    EmptyPath,

    #[error("store error: {0}")]
    Store(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for DbError {
    fn from(e: bincode::Error) -> Self {
        DbError::Codec(e.to_string())
    }
}

/// Total-failure outcome of a tree walk. Partial failures (some roots
/// missing) still return a report; this fires only when not a single
/// root could be prepared.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("no tree roots could be prepared")]
    NoRootsResolved,
}
