use crate::network::{DeviceId, Topology};
use crate::traits::NodeId;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::debug;

/// Next-hop decision for a packet leaving a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub out_device: DeviceId,
    pub next_hop: DeviceId,
}

pub trait RoutingOracle {
    fn route(&self, from: NodeId, dst: Ipv4Addr) -> Option<Route>;
}

/// One-hop routes between every pair of addressed devices that share a channel.
#[derive(Debug, Clone, Default)]
pub struct GlobalRouting {
    table: HashMap<(NodeId, Ipv4Addr), Route>,
}

impl GlobalRouting {
    pub fn populate(topology: &Topology) -> Self {
        let mut table = HashMap::new();
        for src in topology.devices() {
            for dst in topology.devices() {
                if src.node == dst.node {
                    continue;
                }
                let Some(address) = dst.address else {
                    continue;
                };
                if topology.shares_channel(src.id, dst.id) {
                    table.entry((src.node, address)).or_insert(Route {
                        out_device: src.id,
                        next_hop: dst.id,
                    });
                }
            }
        }
        debug!(routes = table.len(), "routing table populated");
        Self { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl RoutingOracle for GlobalRouting {
    fn route(&self, from: NodeId, dst: Ipv4Addr) -> Option<Route> {
        self.table.get(&(from, dst)).copied()
    }
}
