use crate::analytics::FlowKey;
use crate::components::AppState;
use crate::engine::{AppEvent, ScheduleCmd};
use crate::error::Result;
use crate::SimTime;
use std::any::Any;
use std::net::SocketAddrV4;

pub type NodeId = u32;
pub type AppId = u32;

/// What an application sees of the simulation while handling an event.
#[derive(Debug, Clone, Copy)]
pub struct AppContext {
    pub id: AppId,
    pub now: SimTime,
}

/// An application installed on a node. Applications never touch the queue
/// directly: they return the events they want scheduled.
pub trait Application: Any {
    fn on_event(&mut self, event: AppEvent, ctx: &AppContext) -> Result<Vec<ScheduleCmd>>;
    fn name(&self) -> &str;
    fn kind(&self) -> &str;
    fn node(&self) -> NodeId;

    /// Port to bind. `None` asks for an ephemeral port.
    fn requested_port(&self) -> Option<u16> {
        None
    }
    fn bind(&mut self, local: SocketAddrV4);
    fn local_address(&self) -> Option<SocketAddrV4>;
    fn state(&self) -> AppState;

    /// Flow this application originates, if any.
    fn flow_key(&self) -> Option<FlowKey> {
        None
    }

    // Serialization
    fn encode_config(&self) -> serde_json::Value;
    fn snapshot(&self) -> serde_json::Value;

    fn as_any(&self) -> &dyn Any;
}
