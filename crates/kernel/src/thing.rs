//! Built-in operation handlers for tangible entities.
//!
//! Handlers mutate only the target entity and the containment tree,
//! append new operations to their output list, and raise dirty bits.
//! They never deliver anything; delivery belongs to the router.
//! Malformed operations short-circuit with an `Error` operation and no
//! state mutation.

use crate::entity::DirtyFlags;
use crate::error::KernelError;
use crate::motion::Obstacle;
use crate::ops::{Fragment, Operation, Payload, Verb};
use crate::visibility::check_visibility;
use crate::world::World;
use tracing::{debug, warn};
use weald_common::{EntityId, SimConfig, Value};

/// Shared by the move and timer handlers: sweep the path ahead, record
/// the predicted instant, resolve hits that are due immediately.
///
/// Returns whether motion continues and the interval until the next
/// re-evaluation.
fn predict_motion(
    world: &mut World,
    id: EntityId,
    obstacles: &[Obstacle],
    floor: f32,
    now: f64,
    cfg: &SimConfig,
) -> Result<(bool, f64), KernelError> {
    let entity = world.get_mut(id).ok_or(KernelError::EntityMissing(id))?;
    let velocity = match entity.velocity {
        Some(v) if v.length_squared() > cfg.epsilon => v,
        _ => return Ok((false, cfg.move_tick)),
    };
    let position = entity.position;
    let box_size = entity.box_size;
    let mut vel_opt = entity.velocity;
    let mut moving = true;

    let motion = entity
        .motion
        .as_mut()
        .ok_or(KernelError::MotionMissing(id))?;
    let update_time = motion.check_collisions(position, velocity, box_size, obstacles, floor, cfg);
    if motion.collision() {
        if update_time < f64::from(cfg.epsilon) {
            moving = motion.resolve_collision(&mut vel_opt);
        } else {
            motion.collision_time = Some(now + update_time);
        }
    }
    if entity.velocity != vel_opt {
        entity.velocity = vel_opt;
        entity.dirty.raise(DirtyFlags::VELOCITY);
    }
    Ok((moving, update_time))
}

/// Coarse obstacle list for a sweep: the entity's current siblings.
fn sibling_obstacles(world: &World, id: EntityId) -> Vec<Obstacle> {
    world
        .siblings_of(id)
        .map(|s| Obstacle {
            position: s.position,
            box_size: s.box_size,
        })
        .collect()
}

/// Fired once after construction: announce the entity and prime its
/// motion timer.
pub(crate) fn setup_operation(
    world: &mut World,
    id: EntityId,
    _op: &Operation,
    res: &mut Vec<Operation>,
) -> Result<(), KernelError> {
    let entity = world.get(id).ok_or(KernelError::EntityMissing(id))?;
    res.push(
        Operation::new(Verb::Appearance)
            .from(id)
            .arg(Fragment::new(id).with_stamp(entity.stamp)),
    );
    res.push(Operation::update_timer(id, world.config().move_tick));
    Ok(())
}

/// Change position, containment, velocity or orientation.
///
/// Validation is all-or-nothing: every check passes before anything
/// mutates. Pickup and drop are classified purely from the before/after
/// containment relationship and announced before the generic move
/// broadcast.
pub(crate) fn move_operation(
    world: &mut World,
    id: EntityId,
    op: &Operation,
    res: &mut Vec<Operation>,
) -> Result<(), KernelError> {
    let now = world.time();
    let cfg = *world.config();

    let Some(fragment) = op.first_fragment().cloned() else {
        res.push(Operation::error_for(op, "move has no argument", id));
        return Ok(());
    };
    if fragment.id != Some(id) {
        res.push(Operation::error_for(
            op,
            "move argument id does not match the target entity",
            id,
        ));
        return Ok(());
    }
    let Some(new_parent) = fragment.parent else {
        res.push(Operation::error_for(op, "move argument has no destination", id));
        return Ok(());
    };
    let old_parent = {
        let entity = world.get(id).ok_or(KernelError::EntityMissing(id))?;
        entity.parent.ok_or(KernelError::Detached(id))?
    };
    let loc_changed = new_parent != old_parent;
    if loc_changed {
        if !world.contains(new_parent) {
            res.push(Operation::error_for(op, "move destination does not exist", id));
            return Ok(());
        }
        if world.is_ancestor_of(id, new_parent) {
            res.push(Operation::error_for(
                op,
                "attempt to move an entity into itself",
                id,
            ));
            return Ok(());
        }
    }
    let Some(new_pos) = fragment.position else {
        res.push(Operation::error_for(op, "move argument has no position", id));
        return Ok(());
    };

    // Every check has passed; the changes commit from here on.

    if loc_changed {
        let sender_parent = op
            .from
            .and_then(|sender| world.get(sender))
            .and_then(|sender| sender.parent);
        // Pickup: the destination is the sender and the entity leaves the
        // sender's own location.
        if op.from == Some(new_parent) && sender_parent == Some(old_parent) {
            let sender = new_parent;
            res.push(Operation::sight_of(
                Operation::new(Verb::Pickup).from(sender).to(id),
                id,
            ));
            res.push(
                Operation::new(Verb::Wield)
                    .from(id)
                    .to(sender)
                    .arg(Fragment::new(id)),
            );
        }
        // Drop: the entity leaves the sender and lands in the sender's
        // location.
        if op.from == Some(old_parent) {
            let old_parent_parent = world.get(old_parent).and_then(|e| e.parent);
            if old_parent_parent == Some(new_parent) {
                res.push(Operation::sight_of(
                    Operation::new(Verb::Drop).from(old_parent).to(id),
                    id,
                ));
            }
        }
        world.reparent(id, new_parent)?;
    }

    let old_pos;
    let mode;
    {
        let entity = world.get_mut(id).ok_or(KernelError::EntityMissing(id))?;
        entity.stamp += 1;
        // Move operations often carry a mode change; handling it here
        // saves the sender an extra Set.
        match fragment.attrs.get("mode") {
            Some(Value::String(m)) => entity.set_mode(m),
            Some(_) => warn!(entity = %id, "non-string mode in move argument"),
            None => {}
        }
        old_pos = entity.position;
        entity.position = new_pos;
        entity.updated_at = now;
        entity.dirty.raise(DirtyFlags::POSITION);
        if let Some(v) = fragment.velocity {
            entity.velocity = Some(v);
            entity.dirty.raise(DirtyFlags::VELOCITY);
        }
        if let Some(q) = fragment.orientation {
            entity.orientation = q;
            entity.dirty.raise(DirtyFlags::ORIENTATION);
        }
        mode = entity.mode();
    }

    // Fit to the container's height constraints before evaluating
    // collisions.
    let constrained_z = world.constrain_height(new_parent, new_pos, mode);
    let obstacles = sibling_obstacles(world, id);
    let floor = world.floor_of(new_parent);
    if let Some(entity) = world.get_mut(id) {
        entity.position.z = constrained_z;
    }

    let (moving, update_time) = predict_motion(world, id, &obstacles, floor, now, &cfg)?;

    let is_perceptive;
    {
        let entity = world.get(id).ok_or(KernelError::EntityMissing(id))?;
        is_perceptive = entity.is_perceptive();
        // Relay a copy of the move with the committed location written
        // back into its argument.
        let mut relay_fragment = fragment;
        entity.write_location(&mut relay_fragment);
        let mut relay = op.clone();
        relay.delay = None;
        relay.args[0] = Payload::Fragment(relay_fragment);
        res.push(Operation::sight_of(relay, id));
    }

    if moving {
        res.push(Operation::update_timer(id, update_time));
    }
    if is_perceptive {
        check_visibility(world, id, old_pos, res)?;
    }
    Ok(())
}

/// Self-addressed motion timer: integrate, settle due collisions, keep
/// the simulation running while motion continues.
pub(crate) fn update_operation(
    world: &mut World,
    id: EntityId,
    _op: &Operation,
    res: &mut Vec<Operation>,
) -> Result<(), KernelError> {
    let now = world.time();
    let cfg = *world.config();

    let (velocity, parent) = {
        let entity = world.get(id).ok_or(KernelError::EntityMissing(id))?;
        let parent = entity.parent.ok_or(KernelError::Detached(id))?;
        (entity.velocity, parent)
    };
    // A timer outliving the motion that scheduled it is expected; stale
    // firings die here.
    let Some(velocity) = velocity.filter(|v| v.length_squared() > cfg.epsilon) else {
        debug!(entity = %id, "update for a stationary entity ignored");
        return Ok(());
    };

    let obstacles = sibling_obstacles(world, id);
    let floor = world.floor_of(parent);

    let old_pos;
    let mode;
    let mut moving = true;
    {
        let entity = world.get_mut(id).ok_or(KernelError::EntityMissing(id))?;
        let mut time_diff = now - entity.updated_at;
        {
            let motion = entity
                .motion
                .as_ref()
                .ok_or(KernelError::MotionMissing(id))?;
            // A predicted collision that is now due: integrate only up to
            // its instant and settle it after the position update.
            if motion.collision()
                && let Some(instant) = motion.collision_time
                && now >= instant
            {
                time_diff = instant - entity.updated_at;
                moving = false;
            }
        }
        old_pos = entity.position;
        entity.position += velocity * time_diff as f32;
        if !moving {
            let mut vel_opt = entity.velocity;
            let motion = entity
                .motion
                .as_mut()
                .ok_or(KernelError::MotionMissing(id))?;
            moving = motion.resolve_collision(&mut vel_opt);
            if entity.velocity != vel_opt {
                entity.velocity = vel_opt;
                entity.dirty.raise(DirtyFlags::VELOCITY);
            }
        }
        mode = entity.mode();
    }

    let position = world.get(id).ok_or(KernelError::EntityMissing(id))?.position;
    let constrained_z = world.constrain_height(parent, position, mode);
    {
        let entity = world.get_mut(id).ok_or(KernelError::EntityMissing(id))?;
        entity.position.z = constrained_z;
        entity.updated_at = now;
        entity.dirty.raise(DirtyFlags::POSITION);
    }

    let (still_moving, update_time) = if moving {
        predict_motion(world, id, &obstacles, floor, now, &cfg)?
    } else {
        (false, cfg.move_tick)
    };

    let is_perceptive;
    {
        let entity = world.get(id).ok_or(KernelError::EntityMissing(id))?;
        is_perceptive = entity.is_perceptive();
        // The broadcast carries exactly the facets the dirty mask
        // accumulated, plus id and stamp.
        let move_op = Operation::new(Verb::Move)
            .from(id)
            .to(id)
            .arg(entity.changed_fragment());
        res.push(Operation::sight_of(move_op, id));
    }

    if still_moving {
        res.push(Operation::update_timer(id, update_time));
    }
    if is_perceptive {
        check_visibility(world, id, old_pos, res)?;
    }
    Ok(())
}

/// Merge attributes and broadcast the delta. Crossing the zero status
/// threshold expresses destruction as an emitted delete, never an
/// in-place teardown.
pub(crate) fn set_operation(
    world: &mut World,
    id: EntityId,
    op: &Operation,
    res: &mut Vec<Operation>,
) -> Result<(), KernelError> {
    let Some(fragment) = op.first_fragment() else {
        res.push(Operation::error_for(op, "set has no argument", id));
        return Ok(());
    };
    let status = {
        let entity = world.get_mut(id).ok_or(KernelError::EntityMissing(id))?;
        entity.stamp += 1;
        entity.merge(&fragment.attrs);
        entity.status
    };
    let mut relay = op.clone();
    relay.delay = None;
    res.push(Operation::sight_of(relay, id));
    if status < 0.0 {
        res.push(
            Operation::new(Verb::Delete)
                .from(id)
                .to(id)
                .arg(Fragment::new(id)),
        );
    }
    Ok(())
}

/// A fire entity consumes mass from this one.
pub(crate) fn burn_operation(
    world: &mut World,
    id: EntityId,
    op: &Operation,
    res: &mut Vec<Operation>,
) -> Result<(), KernelError> {
    let Some(fire) = op.first_fragment() else {
        res.push(Operation::error_for(op, "burn has no argument", id));
        return Ok(());
    };
    let entity = world.get(id).ok_or(KernelError::EntityMissing(id))?;
    // Entities without a burn rate simply do not burn.
    let Some(burn_speed) = entity.attrs.get("burn_speed").and_then(Value::as_f64) else {
        return Ok(());
    };
    let Some(fire_id) = fire.id else {
        res.push(Operation::error_for(op, "burn argument has no id", id));
        return Ok(());
    };
    let Some(fire_status) = fire.attrs.get("status").and_then(Value::as_f64) else {
        res.push(Operation::error_for(op, "burn argument has no status", id));
        return Ok(());
    };

    let consumed = burn_speed * fire_status;
    let loss = if entity.mass > f64::EPSILON {
        consumed / entity.mass
    } else {
        consumed
    };
    res.push(
        Operation::new(Verb::Set)
            .from(id)
            .to(id)
            .arg(Fragment::new(id).with_attr("status", entity.status - loss)),
    );
    res.push(
        Operation::new(Verb::Nourish)
            .from(id)
            .to(fire_id)
            .arg(Fragment::new(fire_id).with_attr("mass", consumed)),
    );
    Ok(())
}

/// Announce destruction. The removal itself is the router's job.
pub(crate) fn delete_operation(
    _world: &mut World,
    id: EntityId,
    op: &Operation,
    res: &mut Vec<Operation>,
) -> Result<(), KernelError> {
    let mut relay = op.clone();
    relay.delay = None;
    res.push(Operation::sight_of(relay, id));
    Ok(())
}

/// Unknown and extension verbs stay visible: wrap them in a perception
/// broadcast instead of failing.
pub(crate) fn fallback_operation(
    _world: &mut World,
    id: EntityId,
    op: &Operation,
    res: &mut Vec<Operation>,
) -> Result<(), KernelError> {
    let mut relay = op.clone();
    relay.delay = None;
    res.push(Operation::sight_of(relay, id));
    Ok(())
}
