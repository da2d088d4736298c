use crate::store::StoreError;
use weald_common::EntityId;

/// Programmer-fatal conditions inside the kernel.
///
/// Malformed operations are NOT represented here; those are reported back
/// to the sender as `Error`-verb operations and dispatch returns normally.
/// A `KernelError` aborts processing of the offending operation without
/// corrupting sibling state.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("entity {0} not found")]
    EntityMissing(EntityId),
    #[error("entity {0} has no motion state")]
    MotionMissing(EntityId),
    #[error("entity {0} is contained nowhere")]
    Detached(EntityId),
    #[error("the world root cannot be deleted")]
    RootDeletion,
    #[error("reparenting {child} under {parent} would create a containment cycle")]
    ContainmentCycle { child: EntityId, parent: EntityId },
    #[error(transparent)]
    Store(#[from] StoreError),
}
