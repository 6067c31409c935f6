//! Circuit and adjacency lifecycle tests through the engine's public event
//! interface.

use std::time::{Duration, Instant};

use linkstate_router::config::Config;
use linkstate_router::instance::Instance;
use linkstate_router::logging::Logger;
use linkstate_router::protocol::adjacency::AdjacencyState;
use linkstate_router::protocol::circuit::CircuitState;
use linkstate_router::protocol::{InterfaceInfo, LanHello, ProtocolEvent, TimerType};
use linkstate_router::{AddressFamily, LanId, Level, LevelUsage, Snpa, SystemId};

const LOCAL_SNPA: &str = "aa:00:00:00:00:01";

fn test_instance() -> Instance {
    let config = Config::parse(
        r#"{
            system_id: "0000.0000.0001",
            area_tag: "itest",
            area_addresses: ["49.0001"],
            interfaces: [{ name: "eth0" }],
        }"#,
    )
    .unwrap();
    Instance::new(config, Logger::ring(4096).0).unwrap()
}

fn iface_info(snpa: Option<&str>) -> InterfaceInfo {
    InterfaceInfo {
        ifindex: 3,
        mtu: 1500,
        snpa: snpa.map(|s| s.parse().unwrap()),
        prefixes: vec!["10.0.0.1/24".parse().unwrap()],
    }
}

fn hello_from(last: u8, seen: Vec<Snpa>) -> LanHello {
    let id = SystemId([0, 0, 0, 0, 0, last]);
    LanHello {
        source_id: id,
        source_snpa: Snpa([0xaa, 0, 0, 0, 0, last]),
        circuit_type: LevelUsage::Level1And2,
        priority: 64,
        holding_time: Duration::from_secs(30),
        lan_id: LanId::system(id),
        area_addresses: vec!["49.0001".parse().unwrap()],
        seen_snpas: seen,
        ipv4_addresses: vec!["10.0.0.9".parse().unwrap()],
        ipv6_addresses: Vec::new(),
        families: vec![AddressFamily::Ipv4],
    }
}

#[test]
fn failed_bring_up_leaves_circuit_connected_only() {
    let mut instance = test_instance();
    let now = Instant::now();

    // Interface comes up without a usable link-layer address
    instance.handle_event(
        ProtocolEvent::InterfaceUp {
            interface: "eth0".to_string(),
            info: iface_info(None),
        },
        now,
    );
    assert_eq!(
        instance.area().circuit("eth0").unwrap().state,
        CircuitState::ConnectedOnly
    );

    // Enabling attempts the operational bring-up, which must fail and roll
    // back without touching protocol state
    let output = instance.handle_event(
        ProtocolEvent::AdminEnable {
            interface: "eth0".to_string(),
        },
        now,
    );
    let circuit = instance.area().circuit("eth0").unwrap();
    assert_eq!(circuit.state, CircuitState::ConnectedOnly);
    assert!(output.timers.is_empty());

    // No adjacency can be created on a circuit that is not up
    instance.handle_event(
        ProtocolEvent::LanHelloReceived {
            interface: "eth0".to_string(),
            level: Level::L1,
            hello: hello_from(9, Vec::new()),
        },
        now,
    );
    let circuit = instance.area().circuit("eth0").unwrap();
    assert!(circuit.level(Level::L1).adjacencies.is_empty());
}

#[test]
fn adjacency_full_lifecycle() {
    let mut instance = test_instance();
    let now = Instant::now();
    let local: Snpa = LOCAL_SNPA.parse().unwrap();

    instance.handle_event(
        ProtocolEvent::AdminEnable {
            interface: "eth0".to_string(),
        },
        now,
    );
    instance.handle_event(
        ProtocolEvent::InterfaceUp {
            interface: "eth0".to_string(),
            info: iface_info(Some(LOCAL_SNPA)),
        },
        now,
    );
    assert_eq!(
        instance.area().circuit("eth0").unwrap().state,
        CircuitState::Up
    );

    // One-way hello: initializing
    instance.handle_event(
        ProtocolEvent::LanHelloReceived {
            interface: "eth0".to_string(),
            level: Level::L1,
            hello: hello_from(9, Vec::new()),
        },
        now,
    );
    {
        let circuit = instance.area().circuit("eth0").unwrap();
        let adj = &circuit.level(Level::L1).adjacencies[0];
        assert_eq!(adj.state, AdjacencyState::Initializing);
        assert_eq!(circuit.level(Level::L1).up_adjacency_count, 0);
    }

    // Two-way hello: up
    instance.handle_event(
        ProtocolEvent::LanHelloReceived {
            interface: "eth0".to_string(),
            level: Level::L1,
            hello: hello_from(9, vec![local]),
        },
        now,
    );
    {
        let circuit = instance.area().circuit("eth0").unwrap();
        assert_eq!(circuit.level(Level::L1).up_adjacency_count, 1);
        assert_eq!(
            circuit.level(Level::L1).adjacencies[0].state,
            AdjacencyState::Up
        );
    }

    // Hold time expires with no refresh: the adjacency is destroyed
    let output = instance.handle_event(
        ProtocolEvent::TimerExpired(TimerType::AdjacencyHold {
            interface: "eth0".to_string(),
            level: Level::L1,
            system_id: SystemId([0, 0, 0, 0, 0, 9]),
        }),
        now + Duration::from_secs(30),
    );
    let circuit = instance.area().circuit("eth0").unwrap();
    assert!(circuit.level(Level::L1).adjacencies.is_empty());
    assert_eq!(circuit.level(Level::L1).up_adjacency_count, 0);
    // The topology change scheduled local LSP regeneration
    assert!(output
        .timers
        .iter()
        .any(|t| matches!(t.timer_type, TimerType::LspRegenerate { .. })));
}

#[test]
fn interface_down_tears_down_and_reverts_to_configured() {
    let mut instance = test_instance();
    let now = Instant::now();
    let local: Snpa = LOCAL_SNPA.parse().unwrap();

    instance.handle_event(
        ProtocolEvent::AdminEnable {
            interface: "eth0".to_string(),
        },
        now,
    );
    instance.handle_event(
        ProtocolEvent::InterfaceUp {
            interface: "eth0".to_string(),
            info: iface_info(Some(LOCAL_SNPA)),
        },
        now,
    );
    instance.handle_event(
        ProtocolEvent::LanHelloReceived {
            interface: "eth0".to_string(),
            level: Level::L1,
            hello: hello_from(9, vec![local]),
        },
        now,
    );

    instance.handle_event(
        ProtocolEvent::InterfaceDown {
            interface: "eth0".to_string(),
        },
        now,
    );
    let circuit = instance.area().circuit("eth0").unwrap();
    assert_eq!(circuit.state, CircuitState::ConfiguredOnly);
    assert!(circuit.level(Level::L1).adjacencies.is_empty());
    assert_eq!(circuit.level(Level::L1).up_adjacency_count, 0);

    // The cycle can repeat: connectivity returns and the circuit comes up
    instance.handle_event(
        ProtocolEvent::InterfaceUp {
            interface: "eth0".to_string(),
            info: iface_info(Some(LOCAL_SNPA)),
        },
        now,
    );
    assert_eq!(
        instance.area().circuit("eth0").unwrap().state,
        CircuitState::Up
    );
}

#[test]
fn admin_disable_destroys_configured_circuit() {
    let mut instance = test_instance();
    let now = Instant::now();

    instance.handle_event(
        ProtocolEvent::AdminEnable {
            interface: "eth0".to_string(),
        },
        now,
    );
    assert!(instance.area().circuit("eth0").is_some());

    instance.handle_event(
        ProtocolEvent::AdminDisable {
            interface: "eth0".to_string(),
        },
        now,
    );
    assert!(instance.area().circuit("eth0").is_none());
}
