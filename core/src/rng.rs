//! Deterministic random-number substreams.
//!
//! Every entity that needs randomness asks the [`StreamAllocator`] for a block
//! of stream indices. Blocks are handed out from a monotonically increasing
//! cursor, so they never overlap and never get reused within a run. A stream is
//! a ChaCha8 generator keyed by `(seed, run)` with the stream index selecting
//! the ChaCha stream, which makes every draw reproducible on any machine.
//!
//! Reproducibility precondition: assignments depend on the order of
//! [`StreamAllocator::allocate`] calls. Creating entities in a different order
//! yields different (still disjoint) streams for them. This is expected
//! behavior, not a defect.

use crate::network::{ChannelId, DeviceId};
use crate::traits::{AppId, NodeId};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::debug;

/// Simulation entity that owns a block of streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityId {
    Node(NodeId),
    Device(DeviceId),
    Channel(ChannelId),
    Application(AppId),
    /// The propagation collaborator's loss draws.
    Propagation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamAssignment {
    pub entity: EntityId,
    pub first: u64,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct StreamAllocator {
    seed: u64,
    run: u64,
    cursor: u64,
    assignments: Vec<StreamAssignment>,
}

impl StreamAllocator {
    pub fn new(seed: u64, run: u64) -> Self {
        Self::with_first_stream(seed, run, 0)
    }

    pub fn with_first_stream(seed: u64, run: u64, first: u64) -> Self {
        Self {
            seed,
            run,
            cursor: first,
            assignments: Vec::new(),
        }
    }

    /// Reserves `count` consecutive streams for `entity` and returns the first index.
    pub fn allocate(&mut self, entity: EntityId, count: u64) -> u64 {
        let first = self.cursor;
        self.cursor += count;
        self.assignments.push(StreamAssignment {
            entity,
            first,
            count,
        });
        debug!(?entity, first, count, "rng streams assigned");
        first
    }

    /// Next index that `allocate` would hand out.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn assignments(&self) -> &[StreamAssignment] {
        &self.assignments
    }

    /// Generator for stream `index`. Two calls with the same index return
    /// generators that produce identical sequences.
    pub fn stream(&self, index: u64) -> ChaCha8Rng {
        let mut key = [0u8; 32];
        key[..8].copy_from_slice(&self.seed.to_le_bytes());
        key[8..16].copy_from_slice(&self.run.to_le_bytes());
        let mut rng = ChaCha8Rng::from_seed(key);
        rng.set_stream(index);
        rng
    }
}

/// Per-run state that would otherwise be global: the `(seed, run)` pair and
/// the stream cursor. Created once before topology setup and dropped with the
/// simulation that owns it.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    seed: u64,
    run: u64,
    pub streams: StreamAllocator,
}

impl SimulationContext {
    pub fn new(seed: u64, run: u64) -> Self {
        Self::with_first_stream(seed, run, 0)
    }

    pub fn with_first_stream(seed: u64, run: u64, first_stream: u64) -> Self {
        Self {
            seed,
            run,
            streams: StreamAllocator::with_first_stream(seed, run, first_stream),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn run(&self) -> u64 {
        self.run
    }

    /// Allocates one stream for `entity` and returns its generator.
    pub fn rng_for(&mut self, entity: EntityId) -> ChaCha8Rng {
        let index = self.streams.allocate(entity, 1);
        self.streams.stream(index)
    }
}
