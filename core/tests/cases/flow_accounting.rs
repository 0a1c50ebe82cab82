use crate::common::TestBed;
use mlosim_core::*;
use std::net::Ipv4Addr;

fn key(src_port: u16) -> FlowKey {
    FlowKey {
        src: Ipv4Addr::new(10, 1, 0, 2),
        dst: Ipv4Addr::new(10, 1, 0, 1),
        src_port,
        dst_port: 9,
        protocol: Protocol::Udp,
    }
}

#[test]
fn test_gap_counts_as_lost() {
    let mut monitor = FlowMonitor::new();
    let flow = key(49153);
    for seq in 1..=5 {
        monitor.on_send(flow, seq, seq * 1_000, 1028).unwrap();
    }
    for seq in [1, 2, 4, 5] {
        monitor.on_receive(flow, seq, seq * 1_000 + 500, 1028).unwrap();
    }

    let stats = monitor.stats(&flow).unwrap();
    assert_eq!(stats.tx_packets, 5);
    assert_eq!(stats.rx_packets, 4);
    assert_eq!(stats.lost_packets, 1);
    assert_eq!(stats.tx_bytes, 5 * 1028);
    assert_eq!(stats.rx_bytes, 4 * 1028);
    assert_eq!(stats.mean_delay(), Some(500.0));
    assert_eq!(stats.mean_jitter(), Some(0.0));
    assert!((stats.loss_ratio() - 0.2).abs() < 1e-12);
}

#[test]
fn test_unknown_flow_is_an_error() {
    let monitor = FlowMonitor::new();
    assert!(matches!(
        monitor.stats(&key(1)),
        Err(SimError::UnknownFlow(k)) if k == key(1)
    ));
    assert!(matches!(
        monitor.report().get(&key(1)),
        Err(SimError::UnknownFlow(_))
    ));
}

#[test]
fn test_receive_without_send_is_an_integrity_error() {
    let mut monitor = FlowMonitor::new();
    let err = monitor.on_receive(key(7), 0, 10, 100).unwrap_err();
    assert!(matches!(
        err,
        SimError::DataIntegrity {
            seq: 0,
            fault: IntegrityFault::NeverSent,
            ..
        }
    ));

    monitor.on_send(key(7), 0, 0, 100).unwrap();
    let err = monitor.on_receive(key(7), 3, 10, 100).unwrap_err();
    assert!(matches!(
        err,
        SimError::DataIntegrity {
            fault: IntegrityFault::NeverSent,
            ..
        }
    ));
}

#[test]
fn test_duplicates_are_rejected() {
    let mut monitor = FlowMonitor::new();
    monitor.on_send(key(7), 0, 0, 100).unwrap();
    assert!(matches!(
        monitor.on_send(key(7), 0, 5, 100),
        Err(SimError::DataIntegrity {
            fault: IntegrityFault::DuplicateSend,
            ..
        })
    ));

    monitor.on_receive(key(7), 0, 10, 100).unwrap();
    assert!(matches!(
        monitor.on_receive(key(7), 0, 11, 100),
        Err(SimError::DataIntegrity {
            fault: IntegrityFault::DuplicateReceive,
            ..
        })
    ));
    let stats = monitor.stats(&key(7)).unwrap();
    assert_eq!((stats.tx_packets, stats.rx_packets, stats.lost_packets), (1, 1, 0));
}

#[test]
fn test_flows_differing_only_by_port_stay_apart() {
    let mut monitor = FlowMonitor::new();
    monitor.on_send(key(49153), 0, 0, 100).unwrap();
    monitor.on_send(key(49154), 0, 0, 100).unwrap();
    monitor.on_send(key(49154), 1, 1, 100).unwrap();

    assert_eq!(monitor.flow_count(), 2);
    assert_eq!(monitor.stats(&key(49153)).unwrap().tx_packets, 1);
    assert_eq!(monitor.stats(&key(49154)).unwrap().tx_packets, 2);
}

#[test]
fn test_report_is_idempotent() {
    let mut monitor = FlowMonitor::new();
    for seq in 0..10 {
        monitor.on_send(key(1), seq, seq * 100, 500).unwrap();
        if seq % 3 != 0 {
            monitor.on_receive(key(1), seq, seq * 100 + 40 + seq, 500).unwrap();
        }
    }
    let first = monitor.report();
    let second = monitor.report();
    assert_eq!(first, second);
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());

    // A snapshot is detached from the live counters.
    monitor.on_send(key(1), 10, 1_000, 500).unwrap();
    assert_eq!(first.get(&key(1)).unwrap().tx_packets, 10);
    assert_eq!(monitor.report().get(&key(1)).unwrap().tx_packets, 11);
}

#[test]
fn test_delay_percentiles() {
    let mut monitor = FlowMonitor::new();
    for seq in 0..100 {
        monitor.on_send(key(1), seq, 0, 100).unwrap();
        monitor.on_receive(key(1), seq, (seq + 1) * 1_000, 100).unwrap();
    }
    let p50 = monitor.delay_percentile(&key(1), 50.0).unwrap().unwrap();
    let p100 = monitor.delay_percentile(&key(1), 100.0).unwrap().unwrap();
    assert!((49_000..=51_000).contains(&p50), "p50 = {p50}");
    assert!((99_900..=100_100).contains(&p100), "p100 = {p100}");

    monitor.on_send(key(2), 0, 0, 100).unwrap();
    assert_eq!(monitor.delay_percentile(&key(2), 50.0).unwrap(), None);
}

#[test]
fn test_summary_averages_over_flows() {
    let mut monitor = FlowMonitor::new();
    monitor.on_send(key(1), 0, 0, 1_000).unwrap();
    monitor.on_receive(key(1), 0, 2 * MILLISECOND, 1_000).unwrap();
    monitor.on_send(key(2), 0, 0, 1_000).unwrap();
    monitor.on_receive(key(2), 0, 4 * MILLISECOND, 1_000).unwrap();
    monitor.on_send(key(2), 1, 0, 1_000).unwrap();

    let summary = monitor.report().summary();
    assert_eq!(summary.flow_count, 2);
    assert_eq!(summary.tx_packets, 3);
    assert_eq!(summary.rx_packets, 2);
    assert_eq!(summary.lost_packets, 1);
    assert!((summary.avg_delay_ms - 3.0).abs() < 1e-9);
}

#[test]
fn test_end_to_end_delay_on_a_fixed_link() {
    let mut bed = TestBed::new();
    let (ap, _) = bed.add_access_point(Position::new(0.0, 0.0, 0.0));
    let (sta, sta_dev) = bed.add_station(Position::new(10.0, 0.0, 0.0));
    bed.topology
        .set_link_selection(sta_dev, LinkSelection::Fixed(0))
        .unwrap();
    let mut h = bed.build();

    let server = h.add_server(ap, 9);
    let client = h.add_client(sta, ap, 9, MILLISECOND, 1000, 10);
    h.start(server, 0);
    h.start(client, SECOND);
    h.run_until(2 * SECOND);

    let flow = h.flow_of(client);
    let report = h.sim.report();
    let stats = report.get(&flow).unwrap();
    assert_eq!(stats.tx_packets, 10);
    assert_eq!(stats.rx_packets, 10);
    assert_eq!(stats.lost_packets, 0);
    assert_eq!(stats.tx_bytes, 10 * 1028);

    // Data frame at 121.9 Mb/s, ACK at 24 Mb/s, 10 m of flight.
    let expected = (67_466 + 4_667 + 33) as f64;
    assert_eq!(stats.mean_delay(), Some(expected));
    assert_eq!(stats.delay_stddev(), Some(0.0));
    assert_eq!(stats.mean_jitter(), Some(0.0));
    assert_eq!(stats.first_tx_time, Some(SECOND));
    assert_eq!(stats.last_tx_time, Some(SECOND + 9 * MILLISECOND));
    // Budget exhausted at the tenth send.
    assert_eq!(stats.finished_at, Some(SECOND + 9 * MILLISECOND));

    let bps = stats.throughput_bps();
    let expected_bps = (10 * 1028 * 8) as f64 / 0.009;
    assert!((bps - expected_bps).abs() < 1.0, "throughput {bps}");

    let server_log = h.server(server);
    assert_eq!(server_log.total_received(), 10);
    assert_eq!(server_log.total_lost(), 0);
}
