use mlosim_core::*;
use std::net::Ipv4Addr;
use test_case::test_case;

fn one_link_topology() -> (Topology, ChannelId) {
    let mut topology = Topology::new();
    let channel = topology.add_channel(Band::Band5GHz);
    (topology, channel)
}

#[test]
fn test_second_access_point_on_a_node_is_rejected() {
    let (mut topology, _) = one_link_topology();
    let node = topology.add_node(Mobility::default());
    topology
        .install_device(node, DeviceRole::AccessPoint, vec![LinkConfig::band_5ghz()], 0)
        .unwrap();
    let err = topology
        .install_device(node, DeviceRole::AccessPoint, vec![LinkConfig::band_5ghz()], 0)
        .unwrap_err();
    assert!(matches!(err, SimError::DuplicateAttachment(_)));

    // A station device next to the access point is fine.
    topology
        .install_device(node, DeviceRole::Station, vec![LinkConfig::band_5ghz()], 0)
        .unwrap();
}

#[test]
fn test_link_attaches_once() {
    let (mut topology, channel) = one_link_topology();
    let other = topology.add_channel(Band::Band5GHz);
    let node = topology.add_node(Mobility::default());
    let dev = topology
        .install_device(node, DeviceRole::Station, vec![LinkConfig::band_5ghz()], 0)
        .unwrap();
    let link = LinkRef::new(dev, 0);

    topology.attach(link, channel).unwrap();
    assert!(matches!(
        topology.attach(link, other),
        Err(SimError::DuplicateAttachment(_))
    ));
    assert!(matches!(
        topology.attach(link, channel),
        Err(SimError::DuplicateAttachment(_))
    ));
    assert_eq!(topology.channel(channel).unwrap().attachments(), &[link]);
    assert!(topology.channel(other).unwrap().attachments().is_empty());
}

#[test]
fn test_band_mismatch_is_rejected() {
    let (mut topology, channel) = one_link_topology();
    let node = topology.add_node(Mobility::default());
    let dev = topology
        .install_device(node, DeviceRole::Station, vec![LinkConfig::band_6ghz()], 0)
        .unwrap();
    assert!(matches!(
        topology.attach(LinkRef::new(dev, 0), channel),
        Err(SimError::InvalidConfig(_))
    ));
}

#[test]
fn test_unknown_entities() {
    let (mut topology, channel) = one_link_topology();
    assert!(matches!(topology.node(3), Err(SimError::UnknownNode(3))));
    assert!(matches!(topology.device(0), Err(SimError::UnknownDevice(0))));
    assert!(matches!(topology.channel(9), Err(SimError::UnknownChannel(9))));
    assert!(matches!(
        topology.attach(LinkRef::new(0, 0), channel),
        Err(SimError::UnknownLink(_))
    ));
    assert!(matches!(
        topology.install_device(1, DeviceRole::Station, vec![LinkConfig::band_5ghz()], 0),
        Err(SimError::UnknownNode(1))
    ));
}

#[test]
fn test_device_without_links_is_rejected() {
    let (mut topology, _) = one_link_topology();
    let node = topology.add_node(Mobility::default());
    assert!(matches!(
        topology.install_device(node, DeviceRole::Station, vec![], 0),
        Err(SimError::InvalidConfig(_))
    ));
}

#[test_case(Band::Band2_4GHz, 20 => true ; "narrow 2.4GHz")]
#[test_case(Band::Band2_4GHz, 80 => false ; "too wide for 2.4GHz")]
#[test_case(Band::Band5GHz, 160 => true ; "wide 5GHz")]
#[test_case(Band::Band5GHz, 320 => false ; "5GHz too wide")]
#[test_case(Band::Band6GHz, 320 => true ; "full 6GHz")]
#[test_case(Band::Band6GHz, 30 => false ; "odd width")]
fn test_channel_width_validation(band: Band, bandwidth_mhz: u16) -> bool {
    let config = LinkConfig {
        band,
        bandwidth_mhz,
        ..LinkConfig::band_6ghz()
    };
    config.validate().is_ok()
}

#[test]
fn test_zero_rate_mode_is_rejected() {
    let mut config = LinkConfig::band_5ghz();
    config.data_mode.rate_bps = 0;
    assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));
}

#[test_case(1028, 121_900_000 => 67_466 ; "data at 121.9 Mbps")]
#[test_case(14, 24_000_000 => 4_667 ; "ack at 24 Mbps")]
#[test_case(1_000, 8_000 => 1_000_000_000 ; "exact second")]
fn test_frame_duration_rounds_up(bytes: u32, rate_bps: u64) -> SimTime {
    WifiMode::new("m", rate_bps).duration(bytes)
}

#[test]
fn test_addresses_are_consecutive_hosts() {
    let (mut topology, _) = one_link_topology();
    let mut devices = Vec::new();
    for _ in 0..3 {
        let node = topology.add_node(Mobility::default());
        devices.push(
            topology
                .install_device(node, DeviceRole::Station, vec![LinkConfig::band_5ghz()], 0)
                .unwrap(),
        );
    }
    let mut addresses = AddressAllocator::new(Ipv4Addr::new(10, 1, 0, 77), 24).unwrap();
    let assigned: Vec<_> = devices
        .iter()
        .map(|&d| addresses.assign(&mut topology, d).unwrap())
        .collect();
    assert_eq!(
        assigned,
        vec![
            Ipv4Addr::new(10, 1, 0, 1),
            Ipv4Addr::new(10, 1, 0, 2),
            Ipv4Addr::new(10, 1, 0, 3)
        ]
    );
    assert_eq!(topology.node_address(1).unwrap(), Some(Ipv4Addr::new(10, 1, 0, 2)));
}

#[test]
fn test_small_subnet_runs_out() {
    let mut addresses = AddressAllocator::new(Ipv4Addr::new(192, 168, 0, 0), 30).unwrap();
    assert!(addresses.next_address().is_ok());
    assert!(addresses.next_address().is_ok());
    assert!(matches!(addresses.next_address(), Err(SimError::InvalidConfig(_))));
    assert!(AddressAllocator::new(Ipv4Addr::UNSPECIFIED, 31).is_err());
}

#[test]
fn test_routes_only_between_devices_sharing_a_channel() {
    let mut topology = Topology::new();
    let five = topology.add_channel(Band::Band5GHz);
    let six = topology.add_channel(Band::Band6GHz);
    let mut addresses = AddressAllocator::new(Ipv4Addr::new(10, 0, 0, 0), 24).unwrap();
    let mut add = |band_link: LinkConfig, channel| {
        let node = topology.add_node(Mobility::default());
        let dev = topology
            .install_device(node, DeviceRole::Station, vec![band_link], 0)
            .unwrap();
        topology.attach(LinkRef::new(dev, 0), channel).unwrap();
        let address = addresses.assign(&mut topology, dev).unwrap();
        (node, dev, address)
    };
    let (a, _, _) = add(LinkConfig::band_5ghz(), five);
    let (_, b_dev, b_addr) = add(LinkConfig::band_5ghz(), five);
    let (_, _, c_addr) = add(LinkConfig::band_6ghz(), six);

    let routing = GlobalRouting::populate(&topology);
    let route = routing.route(a, b_addr).unwrap();
    assert_eq!(route.next_hop, b_dev);
    assert_eq!(routing.route(a, c_addr), None);
    assert_eq!(routing.len(), 2);
}

#[test]
fn test_constant_velocity_mobility() {
    let mobility = Mobility::ConstantVelocity {
        origin: Position::new(1.0, 0.0, 0.0),
        velocity: Position::new(2.0, 0.0, 0.0),
        since: SECOND,
    };
    assert_eq!(mobility.position_at(0), Position::new(1.0, 0.0, 0.0));
    assert_eq!(mobility.position_at(3 * SECOND), Position::new(5.0, 0.0, 0.0));
}

#[test]
fn test_propagation_range_limit() {
    let mut model = ConstantSpeedPropagation::default().with_max_range(50.0);
    let link = LinkConfig::band_5ghz();
    let origin = Position::default();
    assert!(model.admit(origin, Position::new(30.0, 40.0, 0.0), &link));
    assert!(!model.admit(origin, Position::new(30.0, 41.0, 0.0), &link));
    assert_eq!(model.delay(origin, Position::new(299_792_458.0, 0.0, 0.0)), SECOND);
}

#[test]
fn test_device_reaches_a_channel_through_one_link() {
    let (mut topology, channel) = one_link_topology();
    let node = topology.add_node(Mobility::default());
    let dev = topology
        .install_device(
            node,
            DeviceRole::Station,
            vec![LinkConfig::band_5ghz(), LinkConfig::band_5ghz()],
            0,
        )
        .unwrap();

    topology.attach(LinkRef::new(dev, 0), channel).unwrap();
    assert!(matches!(
        topology.attach(LinkRef::new(dev, 1), channel),
        Err(SimError::DuplicateAttachment(_))
    ));
    assert_eq!(
        topology.channel(channel).unwrap().attachments(),
        &[LinkRef::new(dev, 0)]
    );
    assert_eq!(topology.link(LinkRef::new(dev, 1)).unwrap().channel, None);

    // The same band on a second channel is fine.
    let second = topology.add_channel(Band::Band5GHz);
    topology.attach(LinkRef::new(dev, 1), second).unwrap();
}

#[test]
fn test_fixed_selection_falls_back_to_an_attached_link() {
    let mut topology = Topology::new();
    let links = LinkConfig::multi_link_defaults();
    let channels: Vec<_> = links.iter().map(|l| topology.add_channel(l.band)).collect();
    let node = topology.add_node(Mobility::default());
    let dev = topology
        .install_device(node, DeviceRole::Station, links, 0)
        .unwrap();
    for index in [0, 2] {
        topology.attach(LinkRef::new(dev, index), channels[index]).unwrap();
    }

    topology.set_link_selection(dev, LinkSelection::Fixed(2)).unwrap();
    assert_eq!(topology.select_link(dev).unwrap(), LinkRef::new(dev, 2));

    topology.set_link_selection(dev, LinkSelection::Fixed(1)).unwrap();
    assert_eq!(topology.select_link(dev).unwrap(), LinkRef::new(dev, 0));
}

#[test]
fn test_frame_trace_is_opt_in() {
    let mut topology = Topology::new();
    let channel = topology.add_channel(Band::Band5GHz);
    let node = topology.add_node(Mobility::default());
    let dev = topology
        .install_device(node, DeviceRole::Station, vec![LinkConfig::band_5ghz()], 0)
        .unwrap();
    topology.attach(LinkRef::new(dev, 0), channel).unwrap();

    let ip = Ipv4Addr::new(10, 0, 0, 1);
    let mut packet = crate::common::tagged_packet(5, ip, ip, 0);
    packet.next_hop = Some(dev);
    let link = topology.link_mut(LinkRef::new(dev, 0)).unwrap();
    assert!(link.record_arrival(&packet, dev));
    assert!(link.arrivals().is_empty());
    assert_eq!(link.stats.rx_packets, 1);
}
