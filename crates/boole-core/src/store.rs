use crate::error::DbError;
use crate::model::StoreAddr;

// ─────────────────────────────────────────────
// Object store boundary
// ─────────────────────────────────────────────

/// Byte-payload backend behind the directory.
///
/// The engine treats payloads as opaque: it appends encoded objects
/// and reads them back by address. Interpretation belongs to the
/// codec layer, keyed off directory entry flags.
pub trait ObjectStore: Send + Sync {
    /// Fetch the payload at `addr`.
    fn read(&self, addr: StoreAddr) -> Result<Vec<u8>, DbError>;

    /// Append a payload, returning where it landed.
    fn append(&mut self, bytes: &[u8]) -> Result<StoreAddr, DbError>;
}

/// Append-only in-memory store. Updates write a fresh payload and
/// leave the old bytes behind; nothing is ever reclaimed.
#[derive(Debug, Default)]
pub struct MemStore {
    data: Vec<u8>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore { data: Vec::new() }
    }

    /// Total bytes held, dead payloads included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ObjectStore for MemStore {
    fn read(&self, addr: StoreAddr) -> Result<Vec<u8>, DbError> {
        match addr {
            StoreAddr::Phony => Err(DbError::Store("phony address has no payload".into())),
            StoreAddr::Stored { offset, len } => {
                let start = usize::try_from(offset)
                    .map_err(|_| DbError::Store(format!("offset {offset} out of range")))?;
                let end = start
                    .checked_add(len)
                    .filter(|&end| end <= self.data.len())
                    .ok_or_else(|| DbError::Store(format!("range {offset}+{len} escapes store")))?;
                Ok(self.data[start..end].to_vec())
            }
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<StoreAddr, DbError> {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        Ok(StoreAddr::Stored { offset, len: bytes.len() })
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
