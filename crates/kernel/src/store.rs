//! The persistence contract the kernel consumes.
//!
//! The kernel touches storage only at entity construction (seeding a
//! restored entity's attributes) and destruction (saving them before
//! removal) boundaries, never mid-dispatch.

use weald_common::{AttrMap, EntityId};

/// Errors from an object store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
}

/// Load/save of an entity's attribute map keyed by entity id.
pub trait ObjectStore {
    /// `Ok(None)` when no object is stored under `id`.
    fn load(&self, id: EntityId) -> Result<Option<AttrMap>, StoreError>;
    fn save(&mut self, id: EntityId, attrs: &AttrMap) -> Result<(), StoreError>;
    /// Returns whether an object was actually removed.
    fn delete(&mut self, id: EntityId) -> Result<bool, StoreError>;
}
