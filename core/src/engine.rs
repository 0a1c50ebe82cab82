use crate::analytics::{FlowMonitor, FlowReport};
use crate::error::{Result, SimError};
use crate::network::{LinkRef, LinkStats, Packet, Topology};
use crate::propagation::{ConstantSpeedPropagation, PropagationModel};
use crate::rng::SimulationContext;
use crate::routing::{GlobalRouting, RoutingOracle};
use crate::traits::{AppContext, AppId, Application, NodeId};
use crate::components::AppState;
use crate::{SimDelay, SimTime};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::net::SocketAddrV4;
use tracing::{debug, info, trace};

/// First port handed out to applications that do not ask for one.
pub const EPHEMERAL_PORT_START: u16 = 49153;

/// `now + delay`, or an error when the sum does not fit the clock.
fn offset_time(now: SimTime, delay: SimTime) -> Result<SimTime> {
    now.checked_add(delay)
        .ok_or_else(|| SimError::InvalidConfig(format!("delay {delay}ns overflows the clock")))
}

/// Identifies a scheduled event so it can be cancelled before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle(u64);

impl EventHandle {
    /// Insertion sequence number of the event. Doubles as the tie-break key.
    pub fn seq(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Event<E> {
    pub time: SimTime,
    pub seq: u64,
    pub payload: E,
}

// Ordering ignores the payload: (time, seq) is a total order because seq is unique.
impl<E> PartialEq for Event<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl<E> Eq for Event<E> {}
impl<E> PartialOrd for Event<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<E> Ord for Event<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Ordered store of pending events.
///
/// Events fire in non-decreasing `time` order. Events sharing a fire time fire
/// in the order they were scheduled. This total order is part of the contract:
/// callers rely on it to reproduce a run exactly.
pub struct EventQueue<E> {
    now: SimTime,
    next_seq: u64,
    heap: BinaryHeap<Reverse<Event<E>>>,
    pending: HashSet<u64>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of live (scheduled and not cancelled) events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Schedules `payload` to fire `delay` nanoseconds from now.
    pub fn schedule(&mut self, delay: SimDelay, payload: E) -> Result<EventHandle> {
        let delay = SimTime::try_from(delay).map_err(|_| SimError::InvalidDelay { delay })?;
        self.schedule_at(offset_time(self.now, delay)?, payload)
    }

    /// Schedules `payload` at the absolute time `at`, which may not lie in the past.
    pub fn schedule_at(&mut self, at: SimTime, payload: E) -> Result<EventHandle> {
        if at < self.now {
            return Err(SimError::CausalityViolation { at, now: self.now });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(seq);
        self.heap.push(Reverse(Event {
            time: at,
            seq,
            payload,
        }));
        Ok(EventHandle(seq))
    }

    /// Cancels a pending event. Returns false (and does nothing) if the event
    /// already fired or was already cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.pending.remove(&handle.0)
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    fn skim_cancelled(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.pending.contains(&top.seq) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Fire time of the earliest live event.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.skim_cancelled();
        self.heap.peek().map(|Reverse(event)| event.time)
    }

    /// Pops the earliest live event if it fires at or before `stop`, advancing
    /// the clock to its fire time.
    pub fn pop_until(&mut self, stop: SimTime) -> Option<Event<E>> {
        self.skim_cancelled();
        match self.heap.peek() {
            Some(Reverse(event)) if event.time <= stop => {}
            _ => return None,
        }
        let Reverse(event) = self.heap.pop()?;
        self.pending.remove(&event.seq);
        self.now = event.time;
        Some(event)
    }

    /// Moves the clock forward without firing anything.
    pub fn advance_to(&mut self, time: SimTime) -> Result<()> {
        if time < self.now {
            return Err(SimError::CausalityViolation {
                at: time,
                now: self.now,
            });
        }
        self.now = time;
        Ok(())
    }

    /// Drops every pending event and returns how many were live.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.heap.clear();
        dropped
    }

    /// Executes every event with a fire time at or before `stop`, then discards
    /// the rest and leaves the clock at `stop`. The handler may schedule more
    /// events; those that land inside the deadline are executed as well.
    pub fn run_until<F>(&mut self, stop: SimTime, mut handler: F) -> Result<u64>
    where
        F: FnMut(&mut Self, Event<E>) -> Result<()>,
    {
        let mut executed = 0;
        while let Some(event) = self.pop_until(stop) {
            handler(self, event)?;
            executed += 1;
        }
        self.discard_pending();
        if self.now < stop {
            self.now = stop;
        }
        Ok(executed)
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Start,
    Stop,
    SendNext,
    Receive(Packet),
}

#[derive(Debug, Clone)]
pub enum EventType {
    App { app: AppId, event: AppEvent },
    /// A packet handed to the IP layer of `node` for routing and transmission.
    IpSend { node: NodeId, packet: Packet },
    TransmitComplete { link: LinkRef },
    Deliver { to: LinkRef, packet: Packet },
}

pub struct ScheduleCmd {
    pub delay: SimTime,
    pub event_type: EventType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub executed: u64,
    pub discarded: usize,
    pub end_time: SimTime,
}

/// Owns the event queue and drives topology, applications and the flow monitor.
pub struct Simulation {
    pub context: SimulationContext,
    pub topology: Topology,
    pub components: BTreeMap<AppId, Box<dyn Application>>,
    pub events: EventQueue<EventType>,
    pub flow_monitor: FlowMonitor,
    propagation: Box<dyn PropagationModel>,
    routing: Box<dyn RoutingOracle>,
    bindings: HashMap<(NodeId, u16), AppId>,
    next_ephemeral: HashMap<NodeId, u16>,
    starts: HashMap<AppId, SimTime>,
    stops: HashMap<AppId, EventHandle>,
    next_app_id: AppId,
    next_packet_uid: u64,
    executed: u64,
    ended: bool,
}

impl Simulation {
    pub fn new(context: SimulationContext, topology: Topology) -> Self {
        let routing = GlobalRouting::populate(&topology);
        Self {
            context,
            topology,
            components: BTreeMap::new(),
            events: EventQueue::new(),
            flow_monitor: FlowMonitor::new(),
            propagation: Box::new(ConstantSpeedPropagation::default()),
            routing: Box::new(routing),
            bindings: HashMap::new(),
            next_ephemeral: HashMap::new(),
            starts: HashMap::new(),
            stops: HashMap::new(),
            next_app_id: 0,
            next_packet_uid: 0,
            executed: 0,
            ended: false,
        }
    }

    pub fn with_propagation(mut self, propagation: Box<dyn PropagationModel>) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_routing(mut self, routing: Box<dyn RoutingOracle>) -> Self {
        self.routing = routing;
        self
    }

    pub fn now(&self) -> SimTime {
        self.events.now()
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Total events executed so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    fn ensure_running(&self) -> Result<()> {
        if self.ended {
            return Err(SimError::SimulationEnded(self.now()));
        }
        Ok(())
    }

    /// Installs an application on its node and binds it to the node's address.
    pub fn add_application(&mut self, mut app: Box<dyn Application>) -> Result<AppId> {
        let node = app.node();
        let address = self
            .topology
            .node_address(node)?
            .ok_or_else(|| SimError::InvalidConfig(format!("node {node} has no address")))?;
        let port = match app.requested_port() {
            Some(port) => port,
            None => {
                let next = self.next_ephemeral.entry(node).or_insert(EPHEMERAL_PORT_START);
                let port = *next;
                *next = next.checked_add(1).ok_or_else(|| {
                    SimError::InvalidConfig(format!("node {node} ran out of ephemeral ports"))
                })?;
                port
            }
        };
        if self.bindings.contains_key(&(node, port)) {
            return Err(SimError::PortInUse { node, port });
        }
        app.bind(SocketAddrV4::new(address, port));

        let id = self.next_app_id;
        self.next_app_id += 1;
        debug!(app = id, node, kind = app.kind(), %address, port, "application installed");
        self.bindings.insert((node, port), id);
        self.components.insert(id, app);
        Ok(id)
    }

    pub fn application(&self, id: AppId) -> Option<&dyn Application> {
        self.components.get(&id).map(|app| app.as_ref())
    }

    /// Schedules the application to start at `at`.
    pub fn start_application(&mut self, id: AppId, at: SimTime) -> Result<EventHandle> {
        self.ensure_running()?;
        let node = self
            .components
            .get(&id)
            .ok_or(SimError::UnknownApplication(id))?
            .node();
        let operational_at = self.topology.node_operational_at(node)?;
        if at < operational_at {
            return Err(SimError::InvalidSchedule {
                app: id,
                reason: format!(
                    "start at {at}ns precedes node {node} becoming operational \
                     at {operational_at}ns"
                ),
            });
        }
        let handle = self.events.schedule_at(
            at,
            EventType::App {
                app: id,
                event: AppEvent::Start,
            },
        )?;
        self.starts.insert(id, at);
        Ok(handle)
    }

    /// Schedules the application to stop at `at`. A later call replaces the
    /// previously scheduled stop.
    pub fn stop_application(&mut self, id: AppId, at: SimTime) -> Result<EventHandle> {
        self.ensure_running()?;
        if !self.components.contains_key(&id) {
            return Err(SimError::UnknownApplication(id));
        }
        let start = *self.starts.get(&id).ok_or_else(|| SimError::InvalidSchedule {
            app: id,
            reason: "stop requested before a start was scheduled".to_string(),
        })?;
        if at < start {
            return Err(SimError::InvalidSchedule {
                app: id,
                reason: format!("stop at {at}ns precedes start at {start}ns"),
            });
        }
        let handle = self.events.schedule_at(
            at,
            EventType::App {
                app: id,
                event: AppEvent::Stop,
            },
        )?;
        if let Some(previous) = self.stops.insert(id, handle) {
            self.events.cancel(previous);
        }
        Ok(handle)
    }

    pub fn schedule(&mut self, delay: SimDelay, event_type: EventType) -> Result<EventHandle> {
        self.ensure_running()?;
        self.events.schedule(delay, event_type)
    }

    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.events.cancel(handle)
    }

    /// Executes the next event regardless of its fire time.
    pub fn step(&mut self) -> Result<bool> {
        self.ensure_running()?;
        match self.events.pop_until(SimTime::MAX) {
            Some(event) => {
                self.dispatch(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs the simulation up to the hard deadline `stop`. Events at exactly
    /// `stop` still execute. Anything later is discarded and the run ends.
    pub fn run_until(&mut self, stop: SimTime) -> Result<RunSummary> {
        self.ensure_running()?;
        info!(
            stop,
            pending = self.events.len(),
            seed = self.context.seed(),
            run = self.context.run(),
            "running simulation"
        );
        let mut executed = 0;
        while let Some(event) = self.events.pop_until(stop) {
            self.dispatch(event)?;
            executed += 1;
        }
        let discarded = self.events.discard_pending();
        if self.now() < stop {
            self.events.advance_to(stop)?;
        }
        self.teardown();
        info!(executed, discarded, end = self.now(), "simulation finished");
        Ok(RunSummary {
            executed,
            discarded,
            end_time: self.now(),
        })
    }

    fn teardown(&mut self) {
        let now = self.now();
        self.flow_monitor.finalize_all(now);
        self.stops.clear();
        self.ended = true;
    }

    /// Read-only snapshot of per-flow statistics.
    pub fn report(&self) -> FlowReport {
        self.flow_monitor.report()
    }

    pub fn link_stats(&self, link: LinkRef) -> Result<&LinkStats> {
        Ok(&self.topology.link(link)?.stats)
    }

    /// Hands `packet` to the channel behind `link`. Returns false when the
    /// link's queue was full and the packet was dropped.
    pub fn transmit(&mut self, link: LinkRef, packet: Packet) -> Result<bool> {
        self.ensure_running()?;
        let state = self.topology.link_mut(link)?;
        if state.channel.is_none() {
            return Err(SimError::InvalidConfig(format!(
                "link {link} is not attached to a channel"
            )));
        }
        if !state.enqueue(packet) {
            debug!(%link, "link queue full, packet dropped");
            return Ok(false);
        }
        if !state.is_busy() {
            self.start_transmission(link)?;
        }
        Ok(true)
    }

    fn start_transmission(&mut self, link: LinkRef) -> Result<()> {
        let now = self.now();
        if let Some(airtime) = self.topology.link_mut(link)?.begin_transmission() {
            self.events
                .schedule_at(offset_time(now, airtime)?, EventType::TransmitComplete { link })?;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: Event<EventType>) -> Result<()> {
        self.executed += 1;
        trace!(time = event.time, seq = event.seq, "dispatch");
        match event.payload {
            EventType::App { app, event } => self.deliver_to_app(app, event),
            EventType::IpSend { node, packet } => self.ip_send(node, packet),
            EventType::TransmitComplete { link } => self.complete_transmission(link),
            EventType::Deliver { to, packet } => self.receive_on_link(to, packet),
        }
    }

    fn deliver_to_app(&mut self, id: AppId, event: AppEvent) -> Result<()> {
        let now = self.now();
        let app = self
            .components
            .get_mut(&id)
            .ok_or(SimError::UnknownApplication(id))?;
        let before = app.state();
        let cmds = app.on_event(event, &AppContext { id, now })?;
        if before != AppState::Stopped && app.state() == AppState::Stopped {
            debug!(app = id, now, "application stopped");
            if let Some(key) = app.flow_key() {
                self.flow_monitor.finalize(&key, now);
            }
        }
        for cmd in cmds {
            self.events
                .schedule_at(offset_time(now, cmd.delay)?, cmd.event_type)?;
        }
        Ok(())
    }

    fn ip_send(&mut self, node: NodeId, mut packet: Packet) -> Result<()> {
        let now = self.now();
        packet.uid = self.next_packet_uid;
        self.next_packet_uid += 1;
        self.flow_monitor
            .on_send(packet.flow_key(), packet.seq, now, packet.size())?;

        let Some(route) = self.routing.route(node, *packet.dst.ip()) else {
            debug!(node, dst = %packet.dst, "no route, packet dropped");
            return Ok(());
        };
        packet.next_hop = Some(route.next_hop);
        let link = self.topology.select_link(route.out_device)?;
        self.transmit(link, packet).map(|_| ())
    }

    fn complete_transmission(&mut self, link: LinkRef) -> Result<()> {
        let now = self.now();
        let state = self.topology.link_mut(link)?;
        let Some(packet) = state.finish_transmission() else {
            debug!(%link, "transmit completion with nothing in flight");
            return Ok(());
        };
        let channel_id = state
            .channel
            .ok_or_else(|| SimError::InvalidConfig(format!("link {link} lost its channel")))?;

        let from = self.topology.device_position(link.device, now)?;
        let config = &self.topology.link(link)?.config;
        let channel = self.topology.channel(channel_id)?;
        let topology = &self.topology;
        let propagation = &mut self.propagation;
        let deliveries = channel.deliver(link, |to| {
            let target = topology.device_position(to.device, now).ok()?;
            if propagation.admit(from, target, config) {
                Some(propagation.delay(from, target))
            } else {
                None
            }
        });
        trace!(%link, receivers = deliveries.len(), "channel fan-out");
        for (to, delay) in deliveries {
            self.events.schedule_at(
                offset_time(now, delay)?,
                EventType::Deliver {
                    to,
                    packet: packet.clone(),
                },
            )?;
        }
        self.start_transmission(link)
    }

    fn receive_on_link(&mut self, to: LinkRef, packet: Packet) -> Result<()> {
        let state = self.topology.link_mut(to)?;
        if !state.record_arrival(&packet, to.device) {
            return Ok(());
        }
        let node = self.topology.device(to.device)?.node;
        self.ip_receive(node, packet)
    }

    fn ip_receive(&mut self, node: NodeId, packet: Packet) -> Result<()> {
        let now = self.now();
        self.flow_monitor
            .on_receive(packet.flow_key(), packet.seq, now, packet.size())?;
        match self.bindings.get(&(node, packet.dst.port())) {
            Some(&app) => self.deliver_to_app(app, AppEvent::Receive(packet)),
            None => {
                debug!(node, port = packet.dst.port(), "no listener, packet discarded");
                Ok(())
            }
        }
    }
}
