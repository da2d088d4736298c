//! Simulation kernel of the weald world server.
//!
//! Maintains a containment tree of spatial entities, routes typed
//! operations between them as an actor-style protocol, predicts and
//! resolves motion and collisions, and recomputes which entities can
//! perceive which others as positions change.
//!
//! # Invariants
//! - Handlers only mutate the target entity and containment tree, append
//!   operations to their output, and raise dirty bits; delivery belongs
//!   to the router.
//! - No entity is ever a descendant of itself.
//! - Malformed operations are reported back to their sender as `Error`
//!   operations, never as Rust errors.

pub mod dispatch;
pub mod entity;
pub mod error;
pub mod motion;
pub mod ops;
pub mod router;
pub mod store;
pub mod visibility;
pub mod world;

mod thing;

pub use dispatch::{Dispatcher, ScriptHook};
pub use entity::{DirtyFlags, Entity, EntityKind};
pub use error::KernelError;
pub use motion::{Motion, MotionMode, MotionState, Obstacle};
pub use ops::{Fragment, Operation, Payload, Verb};
pub use router::Router;
pub use store::{ObjectStore, StoreError};
pub use visibility::check_visibility;
pub use world::World;
