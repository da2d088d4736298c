//! Operation dispatch: verb routing per behavioral kind, with script
//! pre-emption.
//!
//! A registered script hook is consulted before any built-in handling;
//! when it reports the operation fully handled, its output is returned
//! unchanged and the built-in handler never runs.

use crate::entity::EntityKind;
use crate::error::KernelError;
use crate::ops::{Operation, Verb};
use crate::thing;
use crate::world::World;
use std::collections::BTreeMap;
use tracing::debug;
use weald_common::EntityId;

/// External logic that may intercept an operation before default
/// handling.
pub trait ScriptHook {
    /// Returns whether the operation was fully handled; `true` skips the
    /// built-in handler entirely.
    fn try_handle(&mut self, entity: EntityId, op: &Operation, res: &mut Vec<Operation>) -> bool;
}

/// Routes operations to the handler bound to (entity kind, verb).
#[derive(Default)]
pub struct Dispatcher {
    hooks: BTreeMap<EntityId, Box<dyn ScriptHook>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a script hook to an entity, replacing any previous one.
    pub fn register_hook(&mut self, entity: EntityId, hook: Box<dyn ScriptHook>) {
        self.hooks.insert(entity, hook);
    }

    pub fn remove_hook(&mut self, entity: EntityId) {
        self.hooks.remove(&entity);
    }

    /// Dispatch one operation to its receiving entity and collect the
    /// handler's output operations, in emission order.
    pub fn dispatch(
        &mut self,
        world: &mut World,
        id: EntityId,
        op: &Operation,
    ) -> Result<Vec<Operation>, KernelError> {
        let kind = world.get(id).ok_or(KernelError::EntityMissing(id))?.kind;
        let mut res = Vec::new();

        if let Some(hook) = self.hooks.get_mut(&id)
            && hook.try_handle(id, op, &mut res)
        {
            debug!(entity = %id, verb = ?op.verb, "operation handled by script");
            return Ok(res);
        }

        match kind {
            EntityKind::World => match op.verb {
                // The root never moves, merges, or dies.
                Verb::Move | Verb::Set | Verb::Delete => {
                    debug!(verb = ?op.verb, "operation addressed to the world root ignored");
                }
                _ => thing::fallback_operation(world, id, op, &mut res)?,
            },
            EntityKind::Thing | EntityKind::Creature => match op.verb {
                Verb::Setup => thing::setup_operation(world, id, op, &mut res)?,
                Verb::Move => thing::move_operation(world, id, op, &mut res)?,
                Verb::Set => thing::set_operation(world, id, op, &mut res)?,
                Verb::Update => thing::update_operation(world, id, op, &mut res)?,
                Verb::Burn => thing::burn_operation(world, id, op, &mut res)?,
                Verb::Delete => thing::delete_operation(world, id, op, &mut res)?,
                _ => thing::fallback_operation(world, id, op, &mut res)?,
            },
        }
        Ok(res)
    }
}
