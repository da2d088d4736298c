//! Perception: who gains or loses sight of whom when an entity moves.
//!
//! The sight test is a conservative distance/size heuristic, not
//! occlusion-aware line of sight: B is visible from A when
//! `B.square_box_size / square_distance(A, B) > square_sight_factor`.
//! Only immediate siblings are tested; perception never crosses
//! containment boundaries.

use crate::error::KernelError;
use crate::ops::{Fragment, Operation, Verb};
use crate::world::World;
use glam::Vec3;
use tracing::debug;
use weald_common::EntityId;

/// Whether something of squared bounding size `square_size` is within
/// sight range at squared distance `square_dist`. Coincident positions
/// are always in range.
fn in_range(square_size: f32, square_dist: f32, factor: f32) -> bool {
    square_dist <= f32::EPSILON || square_size / square_dist > factor
}

/// Recompute sight transitions for `mover` after a committed position
/// change from `old_pos`, appending notifications to `res`.
///
/// Two transition classes per sibling, each tested with the old and the
/// new distance and triggered on the XOR of the outcomes:
/// 1. the mover appearing to / disappearing from a perceptive sibling,
///    emitted per sibling during iteration and carrying only the mover's
///    id and stamp;
/// 2. a sibling appearing to / disappearing from the mover, accumulated
///    and emitted after the loop as at most two self-addressed batch
///    operations. The per-sibling notifications always precede the
///    batches.
pub fn check_visibility(
    world: &World,
    mover: EntityId,
    old_pos: Vec3,
    res: &mut Vec<Operation>,
) -> Result<(), KernelError> {
    let entity = world.get(mover).ok_or(KernelError::EntityMissing(mover))?;
    let factor = world.config().square_sight_factor;
    let from_square_size = entity.square_box_size();
    let self_fragment = Fragment::new(mover).with_stamp(entity.stamp);

    let mut appear: Vec<Fragment> = Vec::new();
    let mut disappear: Vec<Fragment> = Vec::new();

    for sibling in world.siblings_of(mover) {
        let old_dist = sibling.position.distance_squared(old_pos);
        let new_dist = sibling.position.distance_squared(entity.position);

        if sibling.is_perceptive() {
            let was_in_range = in_range(from_square_size, old_dist, factor);
            let is_in_range = in_range(from_square_size, new_dist, factor);
            if was_in_range ^ is_in_range {
                let verb = if was_in_range {
                    Verb::Disappearance
                } else {
                    Verb::Appearance
                };
                res.push(
                    Operation::new(verb)
                        .from(mover)
                        .to(sibling.id)
                        .arg(self_fragment.clone()),
                );
            }
        }

        let other_square_size = sibling.square_box_size();
        let could_see = in_range(other_square_size, old_dist, factor);
        let can_see = in_range(other_square_size, new_dist, factor);
        if could_see ^ can_see {
            let that_fragment = Fragment::new(sibling.id).with_stamp(sibling.stamp);
            if could_see {
                debug!(mover = %mover, other = %sibling.id, "losing sight");
                disappear.push(that_fragment);
            } else {
                debug!(mover = %mover, other = %sibling.id, "gaining sight");
                appear.push(that_fragment);
            }
        }
    }

    if !appear.is_empty() {
        let mut op = Operation::new(Verb::Appearance).from(mover).to(mover);
        for fragment in appear {
            op = op.arg(fragment);
        }
        res.push(op);
    }
    if !disappear.is_empty() {
        let mut op = Operation::new(Verb::Disappearance).from(mover).to(mover);
        for fragment in disappear {
            op = op.arg(fragment);
        }
        res.push(op);
    }
    Ok(())
}
