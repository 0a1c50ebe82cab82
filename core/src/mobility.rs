use crate::{sim_to_secs, SimTime};
use serde::{Deserialize, Serialize};

/// Cartesian position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Where a node is over time. Positions never change unless a moving model
/// is attached explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Mobility {
    Fixed(Position),
    /// Straight-line motion at `velocity` (m/s per axis) starting at `since`.
    ConstantVelocity {
        origin: Position,
        velocity: Position,
        since: SimTime,
    },
}

impl Default for Mobility {
    fn default() -> Self {
        Mobility::Fixed(Position::default())
    }
}

impl Mobility {
    pub fn position_at(&self, time: SimTime) -> Position {
        match *self {
            Mobility::Fixed(position) => position,
            Mobility::ConstantVelocity {
                origin,
                velocity,
                since,
            } => {
                let elapsed = sim_to_secs(time.saturating_sub(since));
                Position::new(
                    origin.x + velocity.x * elapsed,
                    origin.y + velocity.y * elapsed,
                    origin.z + velocity.z * elapsed,
                )
            }
        }
    }
}
