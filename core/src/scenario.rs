//! The reference access point / multi-link station scenario.
//!
//! Stations sit on a circle of radius `distance_m` around the access points.
//! Every device carries one link per entry of [`ScenarioConfig::links`] and
//! link `k` of every device shares channel `k`. Each station runs a periodic
//! UDP client towards a single UDP server on the first access point.

use crate::addressing::AddressAllocator;
use crate::analytics::{FlowReport, FlowSummary};
use crate::components::client::{ClientConfig, UdpClient};
use crate::components::server::{ServerConfig, UdpServer};
use crate::config::{ScenarioConfig, StartJitter};
use crate::engine::{RunSummary, Simulation};
use crate::error::{Result, SimError};
use crate::mobility::{Mobility, Position};
use crate::network::{Band, ChannelId, DeviceId, DeviceRole, LinkRef, Topology};
use crate::propagation::{ConstantSpeedPropagation, RandomLossPropagation};
use crate::rng::{EntityId, SimulationContext};
use crate::traits::{AppId, NodeId};
use crate::{SimTime, MICROSECOND};
use rand::Rng;
use serde::Serialize;
use std::net::SocketAddrV4;
use tracing::info;

pub struct Scenario {
    pub config: ScenarioConfig,
    pub simulation: Simulation,
    pub access_points: Vec<NodeId>,
    pub stations: Vec<NodeId>,
    pub station_devices: Vec<DeviceId>,
    pub server: AppId,
    pub clients: Vec<AppId>,
}

/// Share of the stations' transmitted packets carried by one link index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkShare {
    pub index: usize,
    pub band: Band,
    pub tx_packets: u64,
    pub percent: f64,
}

/// One run of a station-count sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPoint {
    pub n_stations: u32,
    pub summary: FlowSummary,
    pub links: Vec<LinkShare>,
}

/// Runs the scenario once per entry of `station_counts`, everything else
/// taken from `base`.
pub fn sweep_stations(base: &ScenarioConfig, station_counts: &[u32]) -> Result<Vec<SweepPoint>> {
    station_counts
        .iter()
        .map(|&n_stations| {
            let config = ScenarioConfig {
                n_stations,
                ..base.clone()
            };
            let mut scenario = Scenario::build(&config)?;
            let report = scenario.run()?;
            let point = SweepPoint {
                n_stations,
                summary: report.summary(),
                links: scenario.link_distribution()?,
            };
            info!(n_stations, flows = point.summary.flow_count, "sweep point done");
            Ok(point)
        })
        .collect()
}

impl Scenario {
    pub fn build(config: &ScenarioConfig) -> Result<Self> {
        config.validate()?;
        let mut context =
            SimulationContext::with_first_stream(config.seed, config.run, config.first_stream);
        let mut topology = Topology::with_queue_capacity(config.queue_capacity)
            .with_frame_trace(config.trace_frames);
        let channels: Vec<ChannelId> = config
            .links
            .iter()
            .map(|link| topology.add_channel(link.band))
            .collect();

        let mut stations = Vec::new();
        let mut station_devices = Vec::new();
        let n = config.n_stations as f64;
        for i in 0..config.n_stations {
            let angle = std::f64::consts::TAU * i as f64 / n;
            let position = Position::new(
                config.distance_m * angle.cos(),
                config.distance_m * angle.sin(),
                0.0,
            );
            let node = topology.add_node(Mobility::Fixed(position));
            let device = install(
                &mut topology,
                node,
                DeviceRole::Station,
                config,
                &channels,
                config.association_delay(),
            )?;
            stations.push(node);
            station_devices.push(device);
        }

        let mut access_points = Vec::new();
        let mut ap_devices = Vec::new();
        for _ in 0..config.n_access_points {
            let node = topology.add_node(Mobility::Fixed(Position::default()));
            let device = install(
                &mut topology,
                node,
                DeviceRole::AccessPoint,
                config,
                &channels,
                0,
            )?;
            access_points.push(node);
            ap_devices.push(device);
        }

        let mut addresses = AddressAllocator::new(config.address_base, config.prefix_len)?;
        for &device in ap_devices.iter().chain(&station_devices) {
            addresses.assign(&mut topology, device)?;
        }

        let mut simulation = if config.loss_rate > 0.0 {
            let rng = context.rng_for(EntityId::Propagation);
            let model = RandomLossPropagation::new(
                ConstantSpeedPropagation::default(),
                config.loss_rate,
                rng,
            );
            Simulation::new(context, topology).with_propagation(Box::new(model))
        } else {
            Simulation::new(context, topology)
        };

        let ap_node = access_points[0];
        let server_address = simulation
            .topology
            .node_address(ap_node)?
            .ok_or_else(|| SimError::InvalidConfig("access point has no address".to_string()))?;
        let server = simulation.add_application(Box::new(UdpServer::new(
            "server",
            ap_node,
            ServerConfig {
                port: config.server_port,
            },
        )))?;
        simulation.start_application(server, 0)?;
        simulation.stop_application(server, config.stop_time())?;

        let mut clients = Vec::new();
        for (i, &node) in stations.iter().enumerate() {
            let client = UdpClient::new(
                &format!("client-{i}"),
                node,
                ClientConfig {
                    remote: SocketAddrV4::new(server_address, config.server_port),
                    interval: config.interval(),
                    payload_size: config.payload_size,
                    max_packets: config.max_packets,
                },
            );
            let id = simulation.add_application(Box::new(client))?;
            let offset = match config.start_jitter {
                StartJitter::Stride { .. } => config.start_jitter.stride_offset(i),
                StartJitter::Uniform { max_us } => {
                    let mut rng = simulation.context.rng_for(EntityId::Application(id));
                    rng.gen_range(0..=max_us).checked_mul(MICROSECOND)
                }
            };
            let start = offset
                .and_then(|offset| config.client_start().checked_add(offset))
                .ok_or_else(|| {
                    SimError::InvalidConfig(format!(
                        "start jitter of client {i} overflows the clock"
                    ))
                })?;
            simulation.start_application(id, start)?;
            simulation.stop_application(id, config.sim_time())?;
            clients.push(id);
        }

        info!(
            access_points = access_points.len(),
            stations = stations.len(),
            links = config.links.len(),
            %server_address,
            "scenario wired"
        );
        Ok(Self {
            config: config.clone(),
            simulation,
            access_points,
            stations,
            station_devices,
            server,
            clients,
        })
    }

    /// Runs to `sim_time + 1s` and returns the final flow report.
    pub fn run(&mut self) -> Result<FlowReport> {
        self.run_with_summary().map(|(report, _)| report)
    }

    pub fn run_with_summary(&mut self) -> Result<(FlowReport, RunSummary)> {
        let summary = self.simulation.run_until(self.config.stop_time())?;
        let report = self.simulation.report();
        info!(
            flows = report.len(),
            executed = summary.executed,
            "scenario complete"
        );
        Ok((report, summary))
    }

    /// Per link index, the share of packets the stations put on the air.
    /// Percentages are all zero before anything was sent.
    pub fn link_distribution(&self) -> Result<Vec<LinkShare>> {
        let topology = &self.simulation.topology;
        let mut shares = Vec::with_capacity(self.config.links.len());
        for (index, link) in self.config.links.iter().enumerate() {
            let mut tx_packets = 0;
            for &device in &self.station_devices {
                tx_packets += topology.link(LinkRef::new(device, index))?.stats.tx_packets;
            }
            shares.push(LinkShare {
                index,
                band: link.band,
                tx_packets,
                percent: 0.0,
            });
        }
        let total: u64 = shares.iter().map(|s| s.tx_packets).sum();
        if total > 0 {
            for share in &mut shares {
                share.percent = share.tx_packets as f64 * 100.0 / total as f64;
            }
        }
        Ok(shares)
    }

    pub fn server(&self) -> Option<&UdpServer> {
        self.simulation
            .application(self.server)?
            .as_any()
            .downcast_ref::<UdpServer>()
    }

    pub fn client(&self, index: usize) -> Option<&UdpClient> {
        let id = *self.clients.get(index)?;
        self.simulation.application(id)?.as_any().downcast_ref::<UdpClient>()
    }
}

fn install(
    topology: &mut Topology,
    node: NodeId,
    role: DeviceRole,
    config: &ScenarioConfig,
    channels: &[ChannelId],
    operational_at: SimTime,
) -> Result<DeviceId> {
    let device = topology.install_device(node, role, config.links.clone(), operational_at)?;
    for (index, &channel) in channels.iter().enumerate() {
        topology.attach(LinkRef::new(device, index), channel)?;
    }
    topology.set_link_selection(device, config.link_selection)?;
    Ok(device)
}
