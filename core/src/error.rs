use crate::analytics::FlowKey;
use crate::network::{ChannelId, DeviceId, LinkRef};
use crate::traits::{AppId, NodeId};
use crate::{SimDelay, SimTime};
use thiserror::Error;

/// Why a packet event could not be attributed to its flow's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFault {
    /// A receive for a sequence number the flow never sent.
    NeverSent,
    /// A second receive for a sequence number already counted.
    DuplicateReceive,
    /// A second send reusing a sequence number.
    DuplicateSend,
}

impl std::fmt::Display for IntegrityFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            IntegrityFault::NeverSent => "sequence number was never sent",
            IntegrityFault::DuplicateReceive => "sequence number already received",
            IntegrityFault::DuplicateSend => "sequence number already sent",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("negative scheduling delay: {delay}ns")]
    InvalidDelay { delay: SimDelay },

    #[error("cannot schedule at {at}ns, clock is already at {now}ns")]
    CausalityViolation { at: SimTime, now: SimTime },

    #[error("invalid application schedule for {app}: {reason}")]
    InvalidSchedule { app: AppId, reason: String },

    #[error("topology conflict: {0}")]
    DuplicateAttachment(String),

    #[error("no statistics tracked for flow {0}")]
    UnknownFlow(FlowKey),

    #[error("data integrity error on flow {flow}, seq {seq}: {fault}")]
    DataIntegrity {
        flow: FlowKey,
        seq: u64,
        fault: IntegrityFault,
    },

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("unknown link {0}")]
    UnknownLink(LinkRef),

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("unknown application {0}")]
    UnknownApplication(AppId),

    #[error("port {port} already bound on node {node}")]
    PortInUse { node: NodeId, port: u16 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("simulation already ended at {0}ns")]
    SimulationEnded(SimTime),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
