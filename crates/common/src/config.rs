use serde::{Deserialize, Serialize};

/// Tunable constants for the simulation kernel.
///
/// All thresholds are squared quantities where the name says so; the
/// sight test and the minimum-speed test never take square roots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Sight-range threshold: entity B is visible to A when
    /// `B.square_box_size / square_distance(A, B) > square_sight_factor`.
    pub square_sight_factor: f32,
    /// Default re-evaluation interval for moving entities, in seconds,
    /// used when no collision horizon applies.
    pub move_tick: f64,
    /// Minimum squared magnitude treated as non-zero for velocities and
    /// distances.
    pub epsilon: f32,
    /// How far ahead, in seconds, the collision predictor sweeps the path
    /// of a moving entity.
    pub collision_horizon: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            square_sight_factor: 0.0625,
            move_tick: 3.0,
            epsilon: 1e-6,
            collision_horizon: 30.0,
        }
    }
}
