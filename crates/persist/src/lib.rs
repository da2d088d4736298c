//! Object-store implementations for the weald kernel.
//!
//! The kernel consumes storage only through the `ObjectStore` contract:
//! load/save/delete of an entity's attribute map keyed by entity id, at
//! construction and destruction boundaries.
//!
//! # Invariants
//! - Stored payloads are verified against recorded hashes; corruption is
//!   fail-closed, never silently repaired.
//! - Schema versions are checked on open.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
