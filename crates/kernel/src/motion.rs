//! Motion prediction: coarse forward sweeps and collision bookkeeping.
//!
//! Every tangible entity owns a `Motion`. The move handler and the
//! self-timer handler share it: `check_collisions` sweeps the path ahead
//! and reports when the next re-evaluation is due, `resolve_collision`
//! settles a predicted hit once its instant has passed.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use weald_common::SimConfig;

/// How the vertical coordinate of an entity is constrained each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotionMode {
    /// Follows the ground: z is clamped to the containing entity's floor.
    #[default]
    Grounded,
    /// Not constrained at all.
    Fixed,
    /// Rides the surface level of the containing entity.
    Floating,
}

impl MotionMode {
    /// Map the reserved `mode` attribute onto the closed set. Unknown
    /// strings behave as grounded, matching walk/run style modes.
    pub fn from_attr(mode: &str) -> Self {
        match mode {
            "fixed" => MotionMode::Fixed,
            "floating" => MotionMode::Floating,
            _ => MotionMode::Grounded,
        }
    }
}

/// Observable predictor state, derived from velocity and the pending
/// prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Stationary,
    Moving,
    CollisionPending,
}

/// Coarse description of a sibling the sweep tests against.
#[derive(Debug, Clone, Copy)]
pub struct Obstacle {
    pub position: Vec3,
    pub box_size: f32,
}

/// Per-entity motion predictor state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Motion {
    mode: MotionMode,
    /// A forward sweep found an obstruction within the horizon.
    collision: bool,
    /// Absolute world time of the predicted hit, when one is pending.
    pub collision_time: Option<f64>,
}

impl Motion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> MotionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: MotionMode) {
        self.mode = mode;
    }

    /// Whether a predicted collision is pending.
    pub fn collision(&self) -> bool {
        self.collision
    }

    pub fn state(&self, velocity: Option<Vec3>, cfg: &SimConfig) -> MotionState {
        match velocity {
            Some(v) if v.length_squared() > cfg.epsilon => {
                if self.collision {
                    MotionState::CollisionPending
                } else {
                    MotionState::Moving
                }
            }
            _ => MotionState::Stationary,
        }
    }

    /// Sweep the path ahead of a moving entity against its siblings and
    /// the floor of its container.
    ///
    /// Returns the suggested re-evaluation interval: the time to the
    /// earliest predicted hit when one lies within the horizon, otherwise
    /// the default move tick. Sets the collision flag accordingly; the
    /// caller records the absolute instant.
    pub fn check_collisions(
        &mut self,
        position: Vec3,
        velocity: Vec3,
        box_size: f32,
        obstacles: &[Obstacle],
        floor: f32,
        cfg: &SimConfig,
    ) -> f64 {
        self.collision = false;
        self.collision_time = None;

        let mut earliest = f64::INFINITY;
        for obstacle in obstacles {
            if let Some(t) = sphere_sweep(position, velocity, box_size, obstacle, cfg.epsilon)
                && t < earliest
            {
                earliest = t;
            }
        }

        // Descending below the container floor counts as an obstruction
        // for every mode except fixed.
        if self.mode != MotionMode::Fixed
            && velocity.z < -cfg.epsilon
            && position.z > floor
        {
            let t = f64::from((floor - position.z) / velocity.z);
            if t < earliest {
                earliest = t;
            }
        }

        if earliest <= cfg.collision_horizon {
            self.collision = true;
            earliest
        } else {
            cfg.move_tick
        }
    }

    /// Settle a predicted collision once its instant has passed.
    ///
    /// The coarse model stops dead: velocity is cleared and the prediction
    /// discarded. Returns whether motion continues, which is the seam a
    /// slide or deflection model would use.
    pub fn resolve_collision(&mut self, velocity: &mut Option<Vec3>) -> bool {
        self.collision = false;
        self.collision_time = None;
        *velocity = None;
        false
    }
}

/// Earliest instant at which two coarse bounding spheres meet, if any,
/// treating the obstacle as static.
fn sphere_sweep(
    position: Vec3,
    velocity: Vec3,
    box_size: f32,
    obstacle: &Obstacle,
    epsilon: f32,
) -> Option<f64> {
    let rel = obstacle.position - position;
    let combined = box_size + obstacle.box_size;
    // Already interpenetrating pairs are left to separate on their own;
    // re-predicting an immediate hit would wedge the entity permanently.
    if rel.length_squared() <= combined * combined {
        return None;
    }
    let a = velocity.length_squared();
    if a <= epsilon {
        return None;
    }
    let b = rel.dot(velocity);
    // Receding.
    if b <= 0.0 {
        return None;
    }
    let c = rel.length_squared() - combined * combined;
    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (b - disc.sqrt()) / a;
    (t > epsilon).then_some(f64::from(t))
}
