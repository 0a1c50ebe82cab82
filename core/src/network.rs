use crate::analytics::{FlowKey, Protocol};
use crate::error::{Result, SimError};
use crate::mobility::{Mobility, Position};
use crate::traits::NodeId;
use crate::{SimTime, IP_UDP_OVERHEAD, SECOND};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::debug;

pub type DeviceId = u32;
pub type ChannelId = u32;

/// Size of the acknowledgement sent at the control rate after each data frame.
pub const ACK_BYTES: u32 = 14;

pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// Addresses one link of one device. All per-link state is keyed by this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkRef {
    pub device: DeviceId,
    pub index: usize,
}

impl LinkRef {
    pub fn new(device: DeviceId, index: usize) -> Self {
        Self { device, index }
    }
}

impl fmt::Display for LinkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}/link{}", self.device, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "2.4GHz")]
    Band2_4GHz,
    #[serde(rename = "5GHz")]
    Band5GHz,
    #[serde(rename = "6GHz")]
    Band6GHz,
}

impl Band {
    pub fn max_bandwidth_mhz(&self) -> u16 {
        match self {
            Band::Band2_4GHz => 40,
            Band::Band5GHz => 160,
            Band::Band6GHz => 320,
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Band::Band2_4GHz => "2.4GHz",
            Band::Band5GHz => "5GHz",
            Band::Band6GHz => "6GHz",
        };
        f.write_str(label)
    }
}

/// A named transmission mode with its nominal PHY rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiMode {
    pub name: String,
    pub rate_bps: u64,
}

impl WifiMode {
    pub fn new(name: &str, rate_bps: u64) -> Self {
        Self {
            name: name.to_string(),
            rate_bps,
        }
    }

    /// Time needed to put `bytes` on the air at this mode's rate.
    pub fn duration(&self, bytes: u32) -> SimTime {
        let bits = bytes as u128 * 8 * SECOND as u128;
        let rate = self.rate_bps.max(1) as u128;
        bits.div_ceil(rate) as SimTime
    }
}

/// Typed configuration of one radio link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub channel_number: u16,
    pub band: Band,
    pub bandwidth_mhz: u16,
    pub primary20_index: u8,
    pub data_mode: WifiMode,
    pub control_mode: WifiMode,
}

impl LinkConfig {
    // Nominal single-stream rates at a 3.2us guard interval.
    pub fn band_2_4ghz() -> Self {
        Self {
            channel_number: 0,
            band: Band::Band2_4GHz,
            bandwidth_mhz: 20,
            primary20_index: 0,
            data_mode: WifiMode::new("EhtMcs11", 121_900_000),
            control_mode: WifiMode::new("ErpOfdmRate24Mbps", 24_000_000),
        }
    }

    pub fn band_5ghz() -> Self {
        Self {
            channel_number: 0,
            band: Band::Band5GHz,
            bandwidth_mhz: 40,
            primary20_index: 0,
            data_mode: WifiMode::new("EhtMcs9", 195_000_000),
            control_mode: WifiMode::new("OfdmRate24Mbps", 24_000_000),
        }
    }

    pub fn band_6ghz() -> Self {
        Self {
            channel_number: 0,
            band: Band::Band6GHz,
            bandwidth_mhz: 80,
            primary20_index: 0,
            data_mode: WifiMode::new("EhtMcs7", 306_300_000),
            control_mode: WifiMode::new("HeMcs4", 183_800_000),
        }
    }

    /// The three-link set used by the reference multi-link scenario.
    pub fn multi_link_defaults() -> Vec<LinkConfig> {
        vec![Self::band_2_4ghz(), Self::band_5ghz(), Self::band_6ghz()]
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.bandwidth_mhz, 20 | 40 | 80 | 160 | 320) {
            return Err(SimError::InvalidConfig(format!(
                "unsupported channel width {}MHz",
                self.bandwidth_mhz
            )));
        }
        if self.bandwidth_mhz > self.band.max_bandwidth_mhz() {
            return Err(SimError::InvalidConfig(format!(
                "{}MHz is too wide for the {} band",
                self.bandwidth_mhz, self.band
            )));
        }
        for mode in [&self.data_mode, &self.control_mode] {
            if mode.name.is_empty() {
                return Err(SimError::InvalidConfig("wifi mode without a name".to_string()));
            }
            if mode.rate_bps == 0 {
                return Err(SimError::InvalidConfig(format!(
                    "wifi mode {} has a zero rate",
                    mode.name
                )));
            }
        }
        Ok(())
    }

    /// Air time of one data frame of `bytes` plus its acknowledgement.
    pub fn airtime(&self, bytes: u32) -> SimTime {
        self.data_mode.duration(bytes) + self.control_mode.duration(ACK_BYTES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn from_index(index: u64) -> Self {
        let bytes = index.to_be_bytes();
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[2..]);
        Self(mac)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Packet {
    pub uid: u64,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub protocol: Protocol,
    pub seq: u64,
    pub sent_at: SimTime,
    pub payload_size: u32,
    /// Device expected to accept the frame. Set by the routing step.
    pub next_hop: Option<DeviceId>,
}

impl Packet {
    pub fn udp(
        src: SocketAddrV4,
        dst: SocketAddrV4,
        seq: u64,
        sent_at: SimTime,
        payload_size: u32,
    ) -> Self {
        Self {
            uid: 0,
            src,
            dst,
            protocol: Protocol::Udp,
            seq,
            sent_at,
            payload_size,
            next_hop: None,
        }
    }

    /// Size on the wire at the IP layer.
    pub fn size(&self) -> u32 {
        self.payload_size + IP_UDP_OVERHEAD
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey {
            src: *self.src.ip(),
            dst: *self.dst.ip(),
            src_port: self.src.port(),
            dst_port: self.dst.port(),
            protocol: self.protocol,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub queue_drops: u64,
    pub overheard: u64,
}

/// One radio within a (possibly multi-link) device. Owns its own queue.
#[derive(Debug, Clone)]
pub struct Link {
    pub config: LinkConfig,
    pub mac: MacAddress,
    pub channel: Option<ChannelId>,
    pub stats: LinkStats,
    queue: VecDeque<Packet>,
    capacity: usize,
    in_flight: Option<Packet>,
    trace: Option<FrameTrace>,
}

/// Uids of frames sent and heard on one link, kept only when the topology
/// was built with frame tracing.
#[derive(Debug, Clone, Default)]
struct FrameTrace {
    departures: Vec<u64>,
    arrivals: Vec<u64>,
}

impl Link {
    fn new(config: LinkConfig, mac: MacAddress, capacity: usize, traced: bool) -> Self {
        Self {
            config,
            mac,
            channel: None,
            stats: LinkStats::default(),
            queue: VecDeque::new(),
            capacity,
            in_flight: None,
            trace: traced.then(FrameTrace::default),
        }
    }

    pub fn enqueue(&mut self, packet: Packet) -> bool {
        if self.queue.len() >= self.capacity {
            self.stats.queue_drops += 1;
            return false;
        }
        self.queue.push_back(packet);
        true
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Moves the head of the queue onto the air and returns its air time.
    pub fn begin_transmission(&mut self) -> Option<SimTime> {
        if self.in_flight.is_some() {
            return None;
        }
        let packet = self.queue.pop_front()?;
        let airtime = self.config.airtime(packet.size());
        self.in_flight = Some(packet);
        Some(airtime)
    }

    pub fn finish_transmission(&mut self) -> Option<Packet> {
        let packet = self.in_flight.take()?;
        self.stats.tx_packets += 1;
        self.stats.tx_bytes += packet.size() as u64;
        if let Some(trace) = &mut self.trace {
            trace.departures.push(packet.uid);
        }
        Some(packet)
    }

    /// Logs a frame heard on this link. Returns true when `owner` is the
    /// frame's next hop and it should go up the stack.
    pub fn record_arrival(&mut self, packet: &Packet, owner: DeviceId) -> bool {
        if let Some(trace) = &mut self.trace {
            trace.arrivals.push(packet.uid);
        }
        if packet.next_hop == Some(owner) {
            self.stats.rx_packets += 1;
            self.stats.rx_bytes += packet.size() as u64;
            true
        } else {
            self.stats.overheard += 1;
            false
        }
    }

    /// Uids of every frame that reached this link, in arrival order. Empty
    /// unless frame tracing is on.
    pub fn arrivals(&self) -> &[u64] {
        self.trace.as_ref().map_or(&[][..], |t| t.arrivals.as_slice())
    }

    /// Uids of every frame this link finished sending, in order. Empty unless
    /// frame tracing is on.
    pub fn departures(&self) -> &[u64] {
        self.trace.as_ref().map_or(&[][..], |t| t.departures.as_slice())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceRole {
    AccessPoint,
    Station,
}

/// How a multi-link device spreads outgoing packets over its links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkSelection {
    #[default]
    RoundRobin,
    Fixed(usize),
    LeastQueued,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub node: NodeId,
    pub role: DeviceRole,
    pub address: Option<Ipv4Addr>,
    pub operational_at: SimTime,
    pub selection: LinkSelection,
    link_count: usize,
    rr_cursor: usize,
}

impl Device {
    pub fn link_count(&self) -> usize {
        self.link_count
    }

    pub fn link_refs(&self) -> impl Iterator<Item = LinkRef> + '_ {
        (0..self.link_count).map(move |index| LinkRef::new(self.id, index))
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub mobility: Mobility,
    pub devices: Vec<DeviceId>,
}

/// Shared medium. Holds only (device, link) references, never the devices.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub band: Band,
    attachments: Vec<LinkRef>,
}

impl Channel {
    pub fn attachments(&self) -> &[LinkRef] {
        &self.attachments
    }

    /// Offers one frame from `from` to every attachment on another device.
    /// `attempt` returns the propagation delay for an admitted receiver or
    /// `None` for a lost one; each attachment is tried exactly once.
    pub fn deliver<F>(&self, from: LinkRef, mut attempt: F) -> Vec<(LinkRef, SimTime)>
    where
        F: FnMut(LinkRef) -> Option<SimTime>,
    {
        self.attachments
            .iter()
            .copied()
            .filter(|to| to.device != from.device)
            .filter_map(|to| attempt(to).map(|delay| (to, delay)))
            .collect()
    }
}

/// Nodes, devices, links and channels of one simulation.
///
/// Topology is fixed once the simulation starts; only per-link runtime state
/// (queues, counters) changes afterwards.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
    devices: Vec<Device>,
    links: BTreeMap<LinkRef, Link>,
    channels: Vec<Channel>,
    next_mac: u64,
    queue_capacity: usize,
    trace_frames: bool,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            nodes: Vec::new(),
            devices: Vec::new(),
            links: BTreeMap::new(),
            channels: Vec::new(),
            next_mac: 1,
            queue_capacity,
            trace_frames: false,
        }
    }

    /// Keeps a per-link log of sent and heard frame uids for links installed
    /// from now on. Off by default: the logs grow with every frame.
    pub fn with_frame_trace(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    pub fn add_node(&mut self, mobility: Mobility) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node {
            id,
            mobility,
            devices: Vec::new(),
        });
        id
    }

    pub fn add_channel(&mut self, band: Band) -> ChannelId {
        let id = self.channels.len() as ChannelId;
        self.channels.push(Channel {
            id,
            band,
            attachments: Vec::new(),
        });
        id
    }

    /// Installs a device with one link per entry of `links` on `node`.
    pub fn install_device(
        &mut self,
        node: NodeId,
        role: DeviceRole,
        links: Vec<LinkConfig>,
        operational_at: SimTime,
    ) -> Result<DeviceId> {
        if links.is_empty() {
            return Err(SimError::InvalidConfig(
                "a device needs at least one link".to_string(),
            ));
        }
        for config in &links {
            config.validate()?;
        }
        let owner = self.node(node)?;
        if role == DeviceRole::AccessPoint
            && owner
                .devices
                .iter()
                .any(|&d| self.devices[d as usize].role == DeviceRole::AccessPoint)
        {
            return Err(SimError::DuplicateAttachment(format!(
                "node {node} already owns an access point device"
            )));
        }

        let id = self.devices.len() as DeviceId;
        let link_count = links.len();
        for (index, config) in links.into_iter().enumerate() {
            let mac = MacAddress::from_index(self.next_mac);
            self.next_mac += 1;
            let link = Link::new(config, mac, self.queue_capacity, self.trace_frames);
            self.links.insert(LinkRef::new(id, index), link);
        }
        self.devices.push(Device {
            id,
            node,
            role,
            address: None,
            operational_at,
            selection: LinkSelection::default(),
            link_count,
            rr_cursor: 0,
        });
        self.node_mut(node)?.devices.push(id);
        Ok(id)
    }

    /// Attaches `link` to `channel`. A device reaches a channel through at
    /// most one of its links, otherwise one frame would land on two links.
    pub fn attach(&mut self, link: LinkRef, channel: ChannelId) -> Result<()> {
        let target = self.channel(channel)?;
        let band = target.band;
        if let Some(sibling) = target.attachments.iter().find(|r| r.device == link.device) {
            return Err(SimError::DuplicateAttachment(format!(
                "device {} already reaches channel {channel} through {sibling}",
                link.device
            )));
        }
        let state = self.link_mut(link)?;
        if let Some(existing) = state.channel {
            return Err(SimError::DuplicateAttachment(format!(
                "link {link} is already attached to channel {existing}"
            )));
        }
        if state.config.band != band {
            return Err(SimError::InvalidConfig(format!(
                "link {link} is configured for {} but channel {channel} is {band}",
                state.config.band
            )));
        }
        state.channel = Some(channel);
        self.channels[channel as usize].attachments.push(link);
        Ok(())
    }

    pub fn set_link_selection(&mut self, device: DeviceId, selection: LinkSelection) -> Result<()> {
        let dev = self.device_mut(device)?;
        if let LinkSelection::Fixed(index) = selection {
            if index >= dev.link_count {
                return Err(SimError::UnknownLink(LinkRef::new(device, index)));
            }
        }
        dev.selection = selection;
        Ok(())
    }

    pub fn set_address(&mut self, device: DeviceId, address: Ipv4Addr) -> Result<()> {
        self.device_mut(device)?.address = Some(address);
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id as usize).ok_or(SimError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id as usize).ok_or(SimError::UnknownNode(id))
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device> {
        self.devices.get(id as usize).ok_or(SimError::UnknownDevice(id))
    }

    fn device_mut(&mut self, id: DeviceId) -> Result<&mut Device> {
        self.devices
            .get_mut(id as usize)
            .ok_or(SimError::UnknownDevice(id))
    }

    pub fn link(&self, link: LinkRef) -> Result<&Link> {
        self.links.get(&link).ok_or(SimError::UnknownLink(link))
    }

    pub fn link_mut(&mut self, link: LinkRef) -> Result<&mut Link> {
        self.links.get_mut(&link).ok_or(SimError::UnknownLink(link))
    }

    pub fn channel(&self, id: ChannelId) -> Result<&Channel> {
        self.channels
            .get(id as usize)
            .ok_or(SimError::UnknownChannel(id))
    }

    /// Address of the node's first addressed device.
    pub fn node_address(&self, node: NodeId) -> Result<Option<Ipv4Addr>> {
        Ok(self
            .node(node)?
            .devices
            .iter()
            .find_map(|&d| self.devices[d as usize].address))
    }

    /// Time at which every device of the node is operational.
    pub fn node_operational_at(&self, node: NodeId) -> Result<SimTime> {
        Ok(self
            .node(node)?
            .devices
            .iter()
            .map(|&d| self.devices[d as usize].operational_at)
            .max()
            .unwrap_or(0))
    }

    pub fn device_position(&self, device: DeviceId, now: SimTime) -> Result<Position> {
        let node = self.device(device)?.node;
        Ok(self.node(node)?.mobility.position_at(now))
    }

    /// True when some link of `a` and some link of `b` share a channel.
    pub fn shares_channel(&self, a: DeviceId, b: DeviceId) -> bool {
        let channels_of = |device: DeviceId| {
            self.links
                .range(LinkRef::new(device, 0)..=LinkRef::new(device, usize::MAX))
                .filter_map(|(_, link)| link.channel)
                .collect::<Vec<_>>()
        };
        let theirs = channels_of(b);
        channels_of(a).iter().any(|c| theirs.contains(c))
    }

    /// Picks the link of `device` that carries the next outgoing packet.
    pub fn select_link(&mut self, device: DeviceId) -> Result<LinkRef> {
        let dev = self.device(device)?;
        let selection = dev.selection;
        let attached: Vec<LinkRef> = dev
            .link_refs()
            .filter(|r| self.links.get(r).is_some_and(|l| l.channel.is_some()))
            .collect();
        if attached.is_empty() {
            return Err(SimError::InvalidConfig(format!(
                "device {device} has no attached link"
            )));
        }
        match selection {
            LinkSelection::Fixed(index) => match attached.iter().find(|r| r.index == index) {
                Some(&chosen) => Ok(chosen),
                None => {
                    debug!(device, index, "fixed link is not attached, using {}", attached[0]);
                    Ok(attached[0])
                }
            },
            LinkSelection::LeastQueued => Ok(attached
                .iter()
                .copied()
                .min_by_key(|r| {
                    let link = &self.links[r];
                    link.queue_len() + usize::from(link.is_busy())
                })
                .unwrap_or(attached[0])),
            LinkSelection::RoundRobin => {
                let dev = self.device_mut(device)?;
                let chosen = attached[dev.rr_cursor % attached.len()];
                dev.rr_cursor = dev.rr_cursor.wrapping_add(1);
                Ok(chosen)
            }
        }
    }
}
