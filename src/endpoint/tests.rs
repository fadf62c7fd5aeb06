use super::*;

#[test]
fn test_tcp_display() {
    let endpoint = SocketEndpoint::tcp(Ipv4Addr::new(10, 0, 0, 7), 5555);
    assert_eq!(endpoint.to_string(), "tcp://10.0.0.7:5555");
    assert_eq!(endpoint.protocol(), Protocol::Tcp);
}

#[test]
fn test_tcp_localhost_display() {
    assert_eq!(
        SocketEndpoint::tcp_localhost(5556).to_string(),
        "tcp://127.0.0.1:5556"
    );
}

#[test]
fn test_in_process_display() {
    let endpoint = SocketEndpoint::in_process("orders").unwrap();
    assert_eq!(endpoint.to_string(), "inproc://orders");
    assert_eq!(endpoint.protocol(), Protocol::InProc);
}

#[test]
fn test_in_process_rejects_empty_identity() {
    assert_eq!(
        SocketEndpoint::in_process(""),
        Err(EndpointError::EmptyIdentity)
    );
}

#[test]
fn test_multicast_display() {
    let endpoint = SocketEndpoint::multicast(Ipv4Addr::new(239, 1, 1, 1), 7500);
    assert_eq!(endpoint.to_string(), "pgm://239.1.1.1:7500");
    assert_eq!(endpoint.protocol(), Protocol::Pgm);
}

#[test]
fn test_parse_round_trips_display() {
    for text in [
        "tcp://127.0.0.1:5555",
        "inproc://bus-out",
        "pgm://239.192.0.1:7000",
    ] {
        let endpoint: SocketEndpoint = text.parse().unwrap();
        assert_eq!(endpoint.to_string(), text);
    }
}

#[test]
fn test_only_pgm_scheme_for_multicast() {
    // formatting always writes pgm://, so no alias is accepted
    assert!(matches!(
        "epgm://239.192.0.1:7000".parse::<SocketEndpoint>(),
        Err(EndpointError::UnsupportedScheme(_))
    ));
    let endpoint: SocketEndpoint = "pgm://239.192.0.1:7000".parse().unwrap();
    assert_eq!(endpoint.to_string().parse::<SocketEndpoint>().unwrap(), endpoint);
}

#[test]
fn test_parse_localhost_alias() {
    let endpoint: SocketEndpoint = "tcp://localhost:80".parse().unwrap();
    assert_eq!(endpoint, SocketEndpoint::tcp_localhost(80));
}

#[test]
fn test_parse_errors() {
    assert!(matches!(
        "udp://1.2.3.4:5".parse::<SocketEndpoint>(),
        Err(EndpointError::UnsupportedScheme(_))
    ));
    assert!(matches!(
        "127.0.0.1:5".parse::<SocketEndpoint>(),
        Err(EndpointError::UnsupportedScheme(_))
    ));
    assert!(matches!(
        "tcp://300.0.0.1:5".parse::<SocketEndpoint>(),
        Err(EndpointError::InvalidAddress(_))
    ));
    assert!(matches!(
        "tcp://127.0.0.1:70000".parse::<SocketEndpoint>(),
        Err(EndpointError::InvalidPort(_))
    ));
    assert!(matches!(
        "tcp://127.0.0.1".parse::<SocketEndpoint>(),
        Err(EndpointError::InvalidPort(_))
    ));
}

#[test]
fn test_deserialize_from_string() {
    let endpoint: SocketEndpoint = serde_json::from_str("\"tcp://127.0.0.1:9000\"").unwrap();
    assert_eq!(endpoint, SocketEndpoint::tcp_localhost(9000));
    assert!(serde_json::from_str::<SocketEndpoint>("\"bogus\"").is_err());
}

#[test]
fn test_port_ranges() {
    assert!(Port::new(80).is_well_known());
    assert!(!Port::new(80).is_registered());
    assert!(Port::new(5555).is_registered());
    assert!(Port::new(49152).is_dynamic());
    assert!(!Port::new(49151).is_dynamic());
}

#[test]
fn test_dual_tcp() {
    let dual = DualEndpoint::tcp_localhost(5555, 5556).unwrap();
    assert_eq!(dual.incoming().to_string(), "tcp://127.0.0.1:5555");
    assert_eq!(dual.outgoing().to_string(), "tcp://127.0.0.1:5556");
    assert_eq!(
        dual.to_string(),
        "tcp://127.0.0.1:5555 -> tcp://127.0.0.1:5556"
    );
}

#[test]
fn test_dual_tcp_same_port_rejected() {
    assert!(matches!(
        DualEndpoint::tcp_localhost(5555, 5555),
        Err(EndpointError::SameAddress(_))
    ));
}

#[test]
fn test_dual_tcp_same_port_different_hosts_allowed() {
    let dual = DualEndpoint::new(
        SocketEndpoint::tcp(Ipv4Addr::new(10, 0, 0, 1), 5555),
        SocketEndpoint::tcp(Ipv4Addr::new(10, 0, 0, 2), 5555),
    );
    assert!(dual.is_ok());
}

#[test]
fn test_dual_in_process() {
    let dual = DualEndpoint::in_process("bus").unwrap();
    assert_eq!(dual.incoming().to_string(), "inproc://bus-in");
    assert_eq!(dual.outgoing().to_string(), "inproc://bus-out");
}

#[test]
fn test_dual_multicast_same_port_rejected() {
    assert!(DualEndpoint::multicast(Ipv4Addr::new(239, 0, 0, 1), 7000, 7000).is_err());
    assert!(DualEndpoint::multicast(Ipv4Addr::new(239, 0, 0, 1), 7000, 7001).is_ok());
}
