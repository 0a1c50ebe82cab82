use crate::analytics::FlowKey;
use crate::components::AppState;
use crate::engine::{AppEvent, EventType, ScheduleCmd};
use crate::error::{Result, SimError};
use crate::network::Packet;
use crate::traits::{AppContext, Application, NodeId};
use crate::{SimTime, SECOND};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub remote: SocketAddrV4,
    pub interval: SimTime,
    pub payload_size: u32,
    pub max_packets: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 9),
            interval: SECOND,
            payload_size: 1024,
            max_packets: 100,
        }
    }
}

/// Periodic fire-and-forget UDP sender. Each packet carries a sequence number
/// starting at 0 and its send time.
pub struct UdpClient {
    pub name: String,
    pub config: ClientConfig,
    node: NodeId,
    local: Option<SocketAddrV4>,
    state: AppState,
    sent: u64,
    started_at: Option<SimTime>,
    stopped_at: Option<SimTime>,
}

impl UdpClient {
    pub fn new(name: &str, node: NodeId, config: ClientConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            node,
            local: None,
            state: AppState::Idle,
            sent: 0,
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn halt(&mut self, now: SimTime) {
        self.state = AppState::Stopped;
        self.stopped_at.get_or_insert(now);
    }

    fn send(&mut self, ctx: &AppContext) -> Result<Vec<ScheduleCmd>> {
        let local = self
            .local
            .ok_or_else(|| SimError::InvalidConfig(format!("client {} is not bound", self.name)))?;
        let packet = Packet::udp(
            local,
            self.config.remote,
            self.sent,
            ctx.now,
            self.config.payload_size,
        );
        self.sent += 1;

        let mut cmds = vec![ScheduleCmd {
            delay: 0,
            event_type: EventType::IpSend {
                node: self.node,
                packet,
            },
        }];
        if self.sent >= self.config.max_packets {
            debug!(app = ctx.id, sent = self.sent, "packet budget exhausted");
            self.halt(ctx.now);
        } else {
            cmds.push(ScheduleCmd {
                delay: self.config.interval,
                event_type: EventType::App {
                    app: ctx.id,
                    event: AppEvent::SendNext,
                },
            });
        }
        Ok(cmds)
    }
}

impl Application for UdpClient {
    fn on_event(&mut self, event: AppEvent, ctx: &AppContext) -> Result<Vec<ScheduleCmd>> {
        match event {
            AppEvent::Start => {
                if self.state != AppState::Idle {
                    return Ok(vec![]);
                }
                if self.config.interval == 0 {
                    return Err(SimError::InvalidConfig(format!(
                        "client {} has a zero send interval",
                        self.name
                    )));
                }
                self.state = AppState::Running;
                self.started_at = Some(ctx.now);
                if self.config.max_packets == 0 {
                    self.halt(ctx.now);
                    return Ok(vec![]);
                }
                Ok(vec![ScheduleCmd {
                    delay: 0,
                    event_type: EventType::App {
                        app: ctx.id,
                        event: AppEvent::SendNext,
                    },
                }])
            }
            // Ticks left over from before a stop are ignored.
            AppEvent::SendNext if self.state == AppState::Running => self.send(ctx),
            AppEvent::Stop => {
                self.halt(ctx.now);
                Ok(vec![])
            }
            _ => Ok(vec![]),
        }
    }
    fn name(&self) -> &str { &self.name }
    fn kind(&self) -> &str { "UdpClient" }
    fn node(&self) -> NodeId { self.node }
    fn bind(&mut self, local: SocketAddrV4) { self.local = Some(local); }
    fn local_address(&self) -> Option<SocketAddrV4> { self.local }
    fn state(&self) -> AppState { self.state }
    fn flow_key(&self) -> Option<FlowKey> {
        let local = self.local?;
        Some(Packet::udp(local, self.config.remote, 0, 0, 0).flow_key())
    }
    fn encode_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state,
            "sent": self.sent,
            "started_at": self.started_at,
            "stopped_at": self.stopped_at,
        })
    }
    fn as_any(&self) -> &dyn Any { self }
}
