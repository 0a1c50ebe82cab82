use crate::mobility::Position;
use crate::network::LinkConfig;
use crate::{SimTime, SECOND};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

pub const SPEED_OF_LIGHT_MPS: f64 = 299_792_458.0;

/// Decides whether and when a frame sent between two positions arrives.
pub trait PropagationModel {
    /// One-way propagation delay.
    fn delay(&self, from: Position, to: Position) -> SimTime;
    /// Whether the receiver at `to` gets the frame at all.
    fn admit(&mut self, from: Position, to: Position, link: &LinkConfig) -> bool;
}

/// Signals travel at a fixed speed and always arrive within `max_range_m`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantSpeedPropagation {
    pub speed_mps: f64,
    pub max_range_m: Option<f64>,
}

impl Default for ConstantSpeedPropagation {
    fn default() -> Self {
        Self {
            speed_mps: SPEED_OF_LIGHT_MPS,
            max_range_m: None,
        }
    }
}

impl ConstantSpeedPropagation {
    pub fn with_max_range(mut self, meters: f64) -> Self {
        self.max_range_m = Some(meters);
        self
    }
}

impl PropagationModel for ConstantSpeedPropagation {
    fn delay(&self, from: Position, to: Position) -> SimTime {
        let secs = from.distance_to(&to) / self.speed_mps;
        (secs * SECOND as f64).round() as SimTime
    }

    fn admit(&mut self, from: Position, to: Position, _link: &LinkConfig) -> bool {
        self.max_range_m
            .map_or(true, |range| from.distance_to(&to) <= range)
    }
}

/// Drops each admitted frame independently with probability `loss_rate`.
pub struct RandomLossPropagation<P> {
    inner: P,
    loss_rate: f64,
    rng: ChaCha8Rng,
}

impl<P: PropagationModel> RandomLossPropagation<P> {
    /// `rng` should come from the stream allocator so runs stay reproducible.
    pub fn new(inner: P, loss_rate: f64, rng: ChaCha8Rng) -> Self {
        Self {
            inner,
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng,
        }
    }
}

impl<P: PropagationModel> PropagationModel for RandomLossPropagation<P> {
    fn delay(&self, from: Position, to: Position) -> SimTime {
        self.inner.delay(from, to)
    }

    fn admit(&mut self, from: Position, to: Position, link: &LinkConfig) -> bool {
        if !self.inner.admit(from, to, link) {
            return false;
        }
        self.rng.gen::<f64>() >= self.loss_rate
    }
}
