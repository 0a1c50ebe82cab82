pub mod addressing;
pub mod analytics;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod mobility;
pub mod network;
pub mod propagation;
pub mod rng;
pub mod routing;
pub mod scenario;
pub mod traits;

pub use addressing::AddressAllocator;
pub use analytics::{FlowKey, FlowMonitor, FlowReport, FlowStats, FlowSummary, Protocol};
pub use components::client::{ClientConfig, UdpClient};
pub use components::server::{ReceptionLog, ServerConfig, UdpServer};
pub use components::AppState;
pub use config::{ScenarioConfig, StartJitter};
pub use engine::{
    AppEvent, Event, EventHandle, EventQueue, EventType, RunSummary, ScheduleCmd, Simulation,
};
pub use error::{IntegrityFault, Result, SimError};
pub use mobility::{Mobility, Position};
pub use network::{
    Band, Channel, ChannelId, Device, DeviceId, DeviceRole, Link, LinkConfig, LinkRef,
    LinkSelection, LinkStats, MacAddress, Node, Packet, Topology, WifiMode,
};
pub use propagation::{ConstantSpeedPropagation, PropagationModel, RandomLossPropagation};
pub use rng::{EntityId, SimulationContext, StreamAllocator};
pub use routing::{GlobalRouting, Route, RoutingOracle};
pub use scenario::{sweep_stations, LinkShare, Scenario, SweepPoint};
pub use traits::{AppId, Application, NodeId};

/// Simulated time in nanoseconds.
pub type SimTime = u64;
/// Signed scheduling delay in nanoseconds.
pub type SimDelay = i64;

pub const NANOSECOND: SimTime = 1;
pub const MICROSECOND: SimTime = 1_000;
pub const MILLISECOND: SimTime = 1_000_000;
pub const SECOND: SimTime = 1_000_000_000;

/// Header bytes added to every UDP payload at the IP layer (IPv4 20 + UDP 8).
pub const IP_UDP_OVERHEAD: u32 = 28;

/// Converts seconds to simulated time, rounding to the nearest nanosecond.
/// Negative and non-finite inputs clamp to zero.
pub fn secs_to_sim(secs: f64) -> SimTime {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    (secs * SECOND as f64).round() as SimTime
}

pub fn sim_to_secs(time: SimTime) -> f64 {
    time as f64 / SECOND as f64
}
