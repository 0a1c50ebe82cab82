use crate::components::AppState;
use crate::engine::{AppEvent, ScheduleCmd};
use crate::error::Result;
use crate::traits::{AppContext, Application, NodeId};
use crate::SimTime;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddrV4;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 9 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReceptionRecord {
    pub seq: u64,
    pub sent_at: SimTime,
    pub received_at: SimTime,
}

/// Everything one server saw from one source. There is no retransmission,
/// so a gap in sequence numbers is a lost packet.
#[derive(Debug, Clone, Default)]
pub struct ReceptionLog {
    records: Vec<ReceptionRecord>,
    seen: HashSet<u64>,
    highest: Option<u64>,
    pub duplicates: u64,
}

impl ReceptionLog {
    /// Returns false for a sequence number that was already recorded.
    pub fn record(&mut self, seq: u64, sent_at: SimTime, received_at: SimTime) -> bool {
        if !self.seen.insert(seq) {
            self.duplicates += 1;
            return false;
        }
        self.records.push(ReceptionRecord {
            seq,
            sent_at,
            received_at,
        });
        self.highest = Some(self.highest.map_or(seq, |h| h.max(seq)));
        true
    }

    pub fn records(&self) -> &[ReceptionRecord] {
        &self.records
    }

    /// Distinct sequence numbers received.
    pub fn received(&self) -> u64 {
        self.seen.len() as u64
    }

    pub fn highest_seq(&self) -> Option<u64> {
        self.highest
    }

    /// Gaps below the highest sequence number seen, counting from 0.
    pub fn lost(&self) -> u64 {
        self.highest
            .map_or(0, |h| (h + 1).saturating_sub(self.received()))
    }
}

/// UDP sink that logs `(seq, sent_at, received_at)` per source.
pub struct UdpServer {
    pub name: String,
    pub config: ServerConfig,
    node: NodeId,
    local: Option<SocketAddrV4>,
    state: AppState,
    logs: BTreeMap<SocketAddrV4, ReceptionLog>,
    received_bytes: u64,
}

impl UdpServer {
    pub fn new(name: &str, node: NodeId, config: ServerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            node,
            local: None,
            state: AppState::Idle,
            logs: BTreeMap::new(),
            received_bytes: 0,
        }
    }

    pub fn log(&self, source: &SocketAddrV4) -> Option<&ReceptionLog> {
        self.logs.get(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SocketAddrV4> {
        self.logs.keys()
    }

    pub fn total_received(&self) -> u64 {
        self.logs.values().map(ReceptionLog::received).sum()
    }

    pub fn total_lost(&self) -> u64 {
        self.logs.values().map(ReceptionLog::lost).sum()
    }
}

impl Application for UdpServer {
    fn on_event(&mut self, event: AppEvent, ctx: &AppContext) -> Result<Vec<ScheduleCmd>> {
        match event {
            AppEvent::Start if self.state == AppState::Idle => self.state = AppState::Running,
            AppEvent::Stop => self.state = AppState::Stopped,
            AppEvent::Receive(packet) => {
                if self.state != AppState::Running {
                    debug!(app = ctx.id, seq = packet.seq, "server not running, packet discarded");
                    return Ok(vec![]);
                }
                self.received_bytes += packet.payload_size as u64;
                let log = self.logs.entry(packet.src).or_default();
                if !log.record(packet.seq, packet.sent_at, ctx.now) {
                    debug!(app = ctx.id, src = %packet.src, seq = packet.seq, "duplicate packet");
                }
            }
            _ => {}
        }
        Ok(vec![])
    }
    fn name(&self) -> &str { &self.name }
    fn kind(&self) -> &str { "UdpServer" }
    fn node(&self) -> NodeId { self.node }
    fn requested_port(&self) -> Option<u16> { Some(self.config.port) }
    fn bind(&mut self, local: SocketAddrV4) { self.local = Some(local); }
    fn local_address(&self) -> Option<SocketAddrV4> { self.local }
    fn state(&self) -> AppState { self.state }
    fn encode_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state,
            "sources": self.logs.len(),
            "received": self.total_received(),
            "lost": self.total_lost(),
            "received_bytes": self.received_bytes,
        })
    }
    fn as_any(&self) -> &dyn Any { self }
}
