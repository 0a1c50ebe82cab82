use crate::error::{IntegrityFault, Result, SimError};
use crate::{sim_to_secs, SimTime};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn number(&self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }
}

/// 5-tuple identifying one directional flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({:?})",
            self.src, self.src_port, self.dst, self.dst_port, self.protocol
        )
    }
}

/// Per-flow counters. Times are nanoseconds of simulated time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// Sent but not (yet) received. Never negative: only sent sequence
    /// numbers can be counted as received.
    pub lost_packets: u64,
    pub delay_sum: u64,
    pub delay_squared_sum: u128,
    /// Sum of absolute differences between consecutive packet delays.
    pub jitter_sum: u64,
    pub first_tx_time: Option<SimTime>,
    pub last_tx_time: Option<SimTime>,
    pub first_rx_time: Option<SimTime>,
    pub last_rx_time: Option<SimTime>,
    pub finished_at: Option<SimTime>,
}

impl FlowStats {
    pub fn mean_delay(&self) -> Option<f64> {
        (self.rx_packets > 0).then(|| self.delay_sum as f64 / self.rx_packets as f64)
    }

    /// Standard deviation of the one-way delay.
    pub fn delay_stddev(&self) -> Option<f64> {
        let mean = self.mean_delay()?;
        let mean_sq = self.delay_squared_sum as f64 / self.rx_packets as f64;
        Some((mean_sq - mean * mean).max(0.0).sqrt())
    }

    pub fn mean_jitter(&self) -> Option<f64> {
        (self.rx_packets > 1).then(|| self.jitter_sum as f64 / (self.rx_packets - 1) as f64)
    }

    /// Received bits per second over the span between first and last receive.
    pub fn throughput_bps(&self) -> f64 {
        match (self.first_rx_time, self.last_rx_time) {
            (Some(first), Some(last)) if last > first => {
                (self.rx_bytes * 8) as f64 / sim_to_secs(last - first)
            }
            _ => 0.0,
        }
    }

    pub fn loss_ratio(&self) -> f64 {
        if self.tx_packets == 0 {
            return 0.0;
        }
        self.lost_packets as f64 / self.tx_packets as f64
    }
}

struct FlowRecord {
    stats: FlowStats,
    in_flight: HashMap<u64, SimTime>,
    received: HashSet<u64>,
    last_delay: Option<SimTime>,
    delays: Histogram<u64>,
}

impl FlowRecord {
    fn new() -> Result<Self> {
        Ok(Self {
            stats: FlowStats::default(),
            in_flight: HashMap::new(),
            received: HashSet::new(),
            last_delay: None,
            delays: Histogram::new(3).map_err(|e| SimError::Metrics(e.to_string()))?,
        })
    }
}

/// Observes every packet send and receive and aggregates them per flow.
#[derive(Default)]
pub struct FlowMonitor {
    flows: BTreeMap<FlowKey, FlowRecord>,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_send(&mut self, key: FlowKey, seq: u64, time: SimTime, size: u32) -> Result<()> {
        let record = match self.flows.entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => entry.insert(FlowRecord::new()?),
        };
        if record.in_flight.contains_key(&seq) || record.received.contains(&seq) {
            return Err(SimError::DataIntegrity {
                flow: key,
                seq,
                fault: IntegrityFault::DuplicateSend,
            });
        }
        record.in_flight.insert(seq, time);

        let stats = &mut record.stats;
        stats.tx_packets += 1;
        stats.tx_bytes += size as u64;
        stats.first_tx_time.get_or_insert(time);
        stats.last_tx_time = Some(time);
        stats.lost_packets = stats.tx_packets - stats.rx_packets;
        Ok(())
    }

    pub fn on_receive(&mut self, key: FlowKey, seq: u64, time: SimTime, size: u32) -> Result<()> {
        let integrity = |fault| SimError::DataIntegrity {
            flow: key,
            seq,
            fault,
        };
        let record = self
            .flows
            .get_mut(&key)
            .ok_or_else(|| integrity(IntegrityFault::NeverSent))?;
        let Some(sent_at) = record.in_flight.remove(&seq) else {
            let fault = if record.received.contains(&seq) {
                IntegrityFault::DuplicateReceive
            } else {
                IntegrityFault::NeverSent
            };
            return Err(integrity(fault));
        };
        record.received.insert(seq);

        let delay = time.saturating_sub(sent_at);
        record.delays.saturating_record(delay);
        let stats = &mut record.stats;
        stats.rx_packets += 1;
        stats.rx_bytes += size as u64;
        stats.delay_sum += delay;
        stats.delay_squared_sum += (delay as u128) * (delay as u128);
        if let Some(previous) = record.last_delay {
            stats.jitter_sum += delay.abs_diff(previous);
        }
        record.last_delay = Some(delay);
        stats.first_rx_time.get_or_insert(time);
        stats.last_rx_time = Some(time);
        stats.lost_packets = stats.tx_packets - stats.rx_packets;
        Ok(())
    }

    /// Marks the flow as closed by its application. Returns false for
    /// untracked flows.
    pub fn finalize(&mut self, key: &FlowKey, time: SimTime) -> bool {
        match self.flows.get_mut(key) {
            Some(record) => {
                record.stats.finished_at.get_or_insert(time);
                true
            }
            None => false,
        }
    }

    pub fn finalize_all(&mut self, time: SimTime) {
        for record in self.flows.values_mut() {
            record.stats.finished_at.get_or_insert(time);
        }
    }

    pub fn stats(&self, key: &FlowKey) -> Result<&FlowStats> {
        self.flows
            .get(key)
            .map(|record| &record.stats)
            .ok_or(SimError::UnknownFlow(*key))
    }

    /// Delay at percentile `p` (0-100) of the flow's received packets.
    pub fn delay_percentile(&self, key: &FlowKey, p: f64) -> Result<Option<SimTime>> {
        let record = self.flows.get(key).ok_or(SimError::UnknownFlow(*key))?;
        if record.delays.is_empty() {
            return Ok(None);
        }
        Ok(Some(record.delays.value_at_quantile(p.clamp(0.0, 100.0) / 100.0)))
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Snapshot of every flow. Does not touch the live counters.
    pub fn report(&self) -> FlowReport {
        FlowReport {
            flows: self
                .flows
                .iter()
                .map(|(key, record)| (*key, record.stats.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowReport {
    pub flows: BTreeMap<FlowKey, FlowStats>,
}

/// Averages across all flows of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FlowSummary {
    pub flow_count: usize,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub avg_throughput_mbps: f64,
    pub avg_delay_ms: f64,
    pub avg_jitter_ms: f64,
}

impl FlowReport {
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn get(&self, key: &FlowKey) -> Result<&FlowStats> {
        self.flows.get(key).ok_or(SimError::UnknownFlow(*key))
    }

    pub fn summary(&self) -> FlowSummary {
        let mut summary = FlowSummary {
            flow_count: self.flows.len(),
            ..Default::default()
        };
        if self.flows.is_empty() {
            return summary;
        }
        let (mut throughput, mut delay, mut jitter) = (0.0, 0.0, 0.0);
        for stats in self.flows.values() {
            summary.tx_packets += stats.tx_packets;
            summary.rx_packets += stats.rx_packets;
            summary.lost_packets += stats.lost_packets;
            summary.tx_bytes += stats.tx_bytes;
            summary.rx_bytes += stats.rx_bytes;
            throughput += stats.throughput_bps() / 1e6;
            delay += stats.mean_delay().unwrap_or(0.0) / 1e6;
            jitter += stats.mean_jitter().unwrap_or(0.0) / 1e6;
        }
        let n = self.flows.len() as f64;
        summary.avg_throughput_mbps = throughput / n;
        summary.avg_delay_ms = delay / n;
        summary.avg_jitter_ms = jitter / n;
        summary
    }

    /// Deterministic JSON rendering. Flows appear in key order.
    pub fn to_json(&self) -> Result<String> {
        let document = ReportDocument {
            flows: self
                .flows
                .iter()
                .map(|(flow, stats)| FlowEntry { flow, stats })
                .collect(),
            summary: self.summary(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }
}

#[derive(Serialize)]
struct FlowEntry<'a> {
    flow: &'a FlowKey,
    stats: &'a FlowStats,
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    flows: Vec<FlowEntry<'a>>,
    summary: FlowSummary,
}
