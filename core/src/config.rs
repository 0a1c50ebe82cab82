use crate::error::{Result, SimError};
use crate::network::{LinkConfig, LinkSelection, DEFAULT_QUEUE_CAPACITY};
use crate::{secs_to_sim, SimTime, MICROSECOND};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

/// How client start times are spread so that clients never fire at the same
/// instant. A scheduling policy only; no protocol depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartJitter {
    /// Client `i` starts `i * stride_us` microseconds after the base start.
    Stride { stride_us: u64 },
    /// Each client draws an offset in `[0, max_us]` from its own RNG stream.
    Uniform { max_us: u64 },
}

impl Default for StartJitter {
    fn default() -> Self {
        StartJitter::Stride { stride_us: 100 }
    }
}

impl StartJitter {
    /// Offset of client `index` under a stride policy. `None` for a uniform
    /// policy or when the offset does not fit the clock.
    pub fn stride_offset(&self, index: usize) -> Option<SimTime> {
        match *self {
            StartJitter::Stride { stride_us } => (index as SimTime)
                .checked_mul(stride_us)?
                .checked_mul(MICROSECOND),
            StartJitter::Uniform { .. } => None,
        }
    }

    /// Largest offset any of `clients` clients can get.
    pub fn max_offset(&self, clients: u32) -> Option<SimTime> {
        match *self {
            StartJitter::Stride { .. } => {
                self.stride_offset(clients.saturating_sub(1) as usize)
            }
            StartJitter::Uniform { max_us } => max_us.checked_mul(MICROSECOND),
        }
    }
}

/// Parameters of the access point / station scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub n_access_points: u32,
    pub n_stations: u32,
    pub distance_m: f64,
    pub payload_size: u32,
    pub max_packets: u64,
    pub interval_s: f64,
    pub sim_time_s: f64,
    pub client_start_s: f64,
    pub start_jitter: StartJitter,
    pub server_port: u16,
    pub address_base: Ipv4Addr,
    pub prefix_len: u8,
    pub seed: u64,
    pub run: u64,
    pub first_stream: u64,
    pub queue_capacity: usize,
    pub association_delay_s: f64,
    pub loss_rate: f64,
    /// Keep per-link logs of sent and heard frame uids.
    pub trace_frames: bool,
    pub link_selection: LinkSelection,
    pub links: Vec<LinkConfig>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            n_access_points: 1,
            n_stations: 2,
            distance_m: 10.0,
            payload_size: 1000,
            max_packets: 500_000_000,
            interval_s: 0.002,
            sim_time_s: 30.0,
            client_start_s: 1.0,
            start_jitter: StartJitter::default(),
            server_port: 9,
            address_base: Ipv4Addr::new(10, 1, 0, 0),
            prefix_len: 24,
            seed: 1,
            run: 1,
            first_stream: 150,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            association_delay_s: 0.0,
            loss_rate: 0.0,
            trace_frames: false,
            link_selection: LinkSelection::RoundRobin,
            links: LinkConfig::multi_link_defaults(),
        }
    }
}

impl ScenarioConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SimError::InvalidConfig(msg.to_string()));
        if self.n_access_points == 0 {
            return invalid("at least one access point is required");
        }
        if self.n_stations == 0 {
            return invalid("at least one station is required");
        }
        if !(self.distance_m.is_finite() && self.distance_m >= 0.0) {
            return invalid("distance must be a non-negative number of meters");
        }
        if self.payload_size == 0 {
            return invalid("payload size must be positive");
        }
        if self.interval() == 0 {
            return invalid("send interval must be positive");
        }
        if self.sim_time() <= self.client_start() {
            return invalid("simulation time must exceed the client start time");
        }
        let last_start = self
            .start_jitter
            .max_offset(self.n_stations)
            .and_then(|jitter| self.client_start().checked_add(jitter));
        if last_start.map_or(true, |start| start >= self.sim_time()) {
            return invalid("every jittered client start must precede the simulation time");
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return invalid("loss rate must lie in [0, 1]");
        }
        if self.queue_capacity == 0 {
            return invalid("queue capacity must be positive");
        }
        if self.links.is_empty() {
            return invalid("at least one link per device is required");
        }
        if let LinkSelection::Fixed(index) = self.link_selection {
            if index >= self.links.len() {
                return invalid("fixed link index is out of range");
            }
        }
        for link in &self.links {
            link.validate()?;
        }
        Ok(())
    }

    pub fn interval(&self) -> SimTime {
        secs_to_sim(self.interval_s)
    }

    pub fn sim_time(&self) -> SimTime {
        secs_to_sim(self.sim_time_s)
    }

    pub fn client_start(&self) -> SimTime {
        secs_to_sim(self.client_start_s)
    }

    pub fn association_delay(&self) -> SimTime {
        secs_to_sim(self.association_delay_s)
    }

    /// Hard deadline of the run: one second of grace after the clients stop.
    pub fn stop_time(&self) -> SimTime {
        self.sim_time() + crate::SECOND
    }
}
