// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Adjacency manager
//!
//! Tracks neighbors as observed through one circuit. Broadcast circuits keep
//! a per-level collection keyed by system id; point-to-point circuits have a
//! single neighbor slot. Adjacencies are created on the first hello from a
//! new neighbor and destroyed the moment they enter the DOWN state, which is
//! terminal.
//!
//! ## State machine
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | (none) | Unknown | first hello |
//! | Unknown | Initializing | hello accepted, one-way |
//! | Initializing | Up | two-way connectivity confirmed |
//! | Up | Initializing | neighbor no longer lists us |
//! | any | Down | hold time expired / circuit down |

use std::collections::VecDeque;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use crate::instance::actions::{EngineAction, EngineNotification, HandlerResult, PduSend};
use crate::logging::{Facility, Logger};
use crate::protocol::circuit::{Circuit, CircuitState};
use crate::protocol::{LanHello, P2pHello, TimerCancel, TimerRequest, TimerType};
use crate::{
    AddressFamily, AreaAddress, LanId, Level, LevelUsage, Medium, Snpa, SystemId, SystemType,
    LEVEL_COUNT,
};
use crate::{log_debug, log_notice, log_warning};

/// Number of DIS-status records retained per adjacency per level.
pub const DIS_RECORD_COUNT: usize = 8;

/// Protocol state of an adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdjacencyState {
    /// Created, no transition evaluated yet
    Unknown,
    /// Hello seen, two-way connectivity not yet confirmed
    Initializing,
    /// Fully established
    Up,
    /// Terminal; the adjacency object is destroyed on entry
    Down,
}

impl AdjacencyState {
    pub const fn as_str(self) -> &'static str {
        match self {
            AdjacencyState::Unknown => "unknown",
            AdjacencyState::Initializing => "initializing",
            AdjacencyState::Up => "up",
            AdjacencyState::Down => "down",
        }
    }
}

impl std::fmt::Display for AdjacencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a neighbor was the designated router at an observation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisStatus {
    Unknown,
    IsDis,
    NotDis,
}

/// One DIS-status observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisRecord {
    pub status: DisStatus,
    pub changed_at: Instant,
}

/// Fixed-size ring of recent DIS-status transitions; the oldest record is
/// dropped when a new one is pushed into a full ring.
#[derive(Debug, Clone)]
pub struct DisHistory {
    records: VecDeque<DisRecord>,
}

impl DisHistory {
    /// A fresh history has every slot in the unknown state.
    pub fn new(now: Instant) -> Self {
        let mut records = VecDeque::with_capacity(DIS_RECORD_COUNT);
        for _ in 0..DIS_RECORD_COUNT {
            records.push_back(DisRecord {
                status: DisStatus::Unknown,
                changed_at: now,
            });
        }
        Self { records }
    }

    pub fn push(&mut self, status: DisStatus, changed_at: Instant) {
        if self.records.len() == DIS_RECORD_COUNT {
            self.records.pop_front();
        }
        self.records.push_back(DisRecord { status, changed_at });
    }

    pub fn latest(&self) -> &DisRecord {
        self.records.back().expect("history is never empty")
    }

    pub fn iter(&self) -> impl Iterator<Item = &DisRecord> {
        self.records.iter()
    }
}

/// A neighbor as observed through one circuit.
#[derive(Debug, Clone)]
pub struct Adjacency {
    pub system_id: SystemId,
    /// Link-layer address, or the zero sentinel when unknown
    pub snpa: Snpa,
    /// Level this adjacency object belongs to
    pub level: Level,
    /// Levels the neighbor advertises
    pub usage: LevelUsage,
    pub state: AdjacencyState,
    pub system_type: SystemType,
    /// DR priority from the latest hello
    pub priority: u8,
    /// The neighbor's view of the segment's designated router
    pub lan_id: Option<LanId>,
    pub holding_time: Duration,
    pub last_update: Instant,
    pub expires_at: Instant,
    /// Times this adjacency has come up
    pub flaps: u32,
    pub last_flap: Option<Instant>,
    /// Current DIS flag per level
    pub dis: [DisStatus; LEVEL_COUNT],
    /// Recent DIS transitions per level
    pub dis_history: [DisHistory; LEVEL_COUNT],
    pub area_addresses: Vec<AreaAddress>,
    pub ipv4_addresses: Vec<Ipv4Addr>,
    pub ipv6_addresses: Vec<Ipv6Addr>,
    /// Address families the neighbor negotiates
    pub families: Vec<AddressFamily>,
}

impl Adjacency {
    pub fn new(system_id: SystemId, snpa: Snpa, level: Level, now: Instant) -> Self {
        Self {
            system_id,
            snpa,
            level,
            usage: match level {
                Level::L1 => LevelUsage::Level1,
                Level::L2 => LevelUsage::Level2,
            },
            state: AdjacencyState::Unknown,
            system_type: SystemType::Unknown,
            priority: 0,
            lan_id: None,
            holding_time: Duration::ZERO,
            last_update: now,
            expires_at: now,
            flaps: 0,
            last_flap: None,
            dis: [DisStatus::Unknown; LEVEL_COUNT],
            dis_history: [DisHistory::new(now), DisHistory::new(now)],
            area_addresses: Vec::new(),
            ipv4_addresses: Vec::new(),
            ipv6_addresses: Vec::new(),
            families: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Find a neighbor by system id (linear scan of the level's collection).
pub fn lookup_by_sysid<'a>(
    circuit: &'a Circuit,
    level: Level,
    system_id: SystemId,
) -> Option<&'a Adjacency> {
    circuit
        .level(level)
        .adjacencies
        .iter()
        .find(|a| a.system_id == system_id)
}

/// Find a neighbor by link-layer address (linear scan).
pub fn lookup_by_snpa<'a>(circuit: &'a Circuit, level: Level, snpa: Snpa) -> Option<&'a Adjacency> {
    circuit
        .level(level)
        .adjacencies
        .iter()
        .find(|a| a.snpa == snpa)
}

/// Guarded adjacency state transition.
///
/// All side effects are expressed through the returned [`HandlerResult`]:
/// timers, pseudonode regeneration, dispatcher notifications, and the
/// immediate transmissions required on point-to-point establishment.
/// Entry to [`AdjacencyState::Down`] destroys the adjacency object.
pub fn state_change(
    circuit: &mut Circuit,
    level: Level,
    system_id: SystemId,
    new_state: AdjacencyState,
    reason: &str,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();
    let is_p2p = circuit.medium == Medium::PointToPoint;

    // Snapshot what the transition needs, then mutate
    let snapshot = if is_p2p {
        circuit
            .p2p_neighbor
            .as_ref()
            .filter(|a| a.system_id == system_id)
            .map(|a| (a.state, a.system_type, a.usage))
    } else {
        lookup_by_sysid(circuit, level, system_id).map(|a| (a.state, a.system_type, a.usage))
    };
    let Some((old_state, old_type, usage)) = snapshot else {
        log_debug!(
            logger,
            Facility::Adjacency,
            &format!("{}: state change for unknown neighbor {system_id} ignored", circuit.interface)
        );
        return result;
    };
    if old_state == new_state {
        return result;
    }

    log_notice!(
        logger,
        Facility::Adjacency,
        &format!(
            "{}: neighbor {system_id} {old_state} -> {new_state} ({reason})",
            circuit.interface
        )
    );

    {
        let adj = if is_p2p {
            circuit.p2p_neighbor.as_mut().unwrap()
        } else {
            circuit
                .level_mut(level)
                .adjacencies
                .iter_mut()
                .find(|a| a.system_id == system_id)
                .unwrap()
        };
        adj.state = new_state;
        if new_state == AdjacencyState::Up {
            adj.flaps += 1;
            adj.last_flap = Some(now);
        }
    }

    // Maintain the per-level up-adjacency counter across any transition
    if new_state == AdjacencyState::Up {
        circuit.level_mut(level).up_adjacency_count += 1;
    } else if old_state == AdjacencyState::Up {
        let lvl = circuit.level_mut(level);
        lvl.up_adjacency_count = lvl.up_adjacency_count.saturating_sub(1);
    }

    // The dispatcher cares about transitions that change topology:
    // entering UP, or leaving it
    if new_state == AdjacencyState::Up || old_state == AdjacencyState::Up {
        result.notify(EngineNotification::AdjacencyStateChanged {
            interface: circuit.interface.clone(),
            level,
            system_id,
            new_state,
        });
    }

    match new_state {
        AdjacencyState::Up => {
            if is_p2p {
                if old_type == SystemType::Unknown {
                    // Neighbor never saw a hello carrying our current view
                    result.send(PduSend::P2pHello {
                        interface: circuit.interface.clone(),
                    });
                }
                // Kick off database synchronization without waiting a period
                for l in usage.levels() {
                    result.send(PduSend::Csnp {
                        interface: circuit.interface.clone(),
                        level: l,
                    });
                }
            }
        }
        AdjacencyState::Down => {
            // Nothing left to flood to once the last adjacency is gone
            if circuit.levels.iter().all(|l| l.up_adjacency_count == 0) {
                circuit.lsp_tx_queue.clear();
            }
            result.cancel(TimerCancel::One(TimerType::AdjacencyHold {
                interface: circuit.interface.clone(),
                level,
                system_id,
            }));
            // Destruction: the object leaves its collection and drops its
            // owned address and area lists with it
            if is_p2p {
                circuit.p2p_neighbor = None;
            } else {
                circuit
                    .level_mut(level)
                    .adjacencies
                    .retain(|a| a.system_id != system_id);
            }
        }
        AdjacencyState::Initializing | AdjacencyState::Unknown => {}
    }

    if !is_p2p {
        rebuild_neighbor_snpas(circuit, level);
        circuit.level_mut(level).dr.election_pending = true;
        if circuit.level(level).dr.is_dr {
            result.add_action(EngineAction::GeneratePseudonode {
                interface: circuit.interface.clone(),
                level,
            });
        }
    }

    result
}

/// Hold-timer expiry: the advertised holding time elapsed with no refresh.
pub fn hold_timer_expired(
    circuit: &mut Circuit,
    level: Level,
    system_id: SystemId,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    state_change(
        circuit,
        level,
        system_id,
        AdjacencyState::Down,
        "holding time expired",
        now,
        logger,
    )
}

/// Process a parsed LAN hello for one circuit level.
pub fn process_lan_hello(
    circuit: &mut Circuit,
    level: Level,
    hello: &LanHello,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();

    if circuit.state != CircuitState::Up {
        log_warning!(
            logger,
            Facility::Adjacency,
            &format!("{}: LAN hello on circuit that is not up", circuit.interface)
        );
        return result;
    }
    if circuit.medium != Medium::Broadcast {
        log_warning!(
            logger,
            Facility::Adjacency,
            &format!("{}: LAN hello on non-broadcast circuit", circuit.interface)
        );
        return result;
    }
    if !circuit.is_enabled(level) || !hello.circuit_type.has(level) {
        log_warning!(
            logger,
            Facility::Adjacency,
            &format!("{}: LAN hello for disabled {level}", circuit.interface)
        );
        return result;
    }

    let our_snpa = circuit.snpa();
    if hello.source_snpa == our_snpa {
        // Our own transmission looped back
        return result;
    }

    let priority_changed;
    let is_new = lookup_by_sysid(circuit, level, hello.source_id).is_none();
    if is_new {
        log_debug!(
            logger,
            Facility::Adjacency,
            &format!(
                "{}: new {level} neighbor {} ({})",
                circuit.interface, hello.source_id, hello.source_snpa
            )
        );
        circuit
            .level_mut(level)
            .adjacencies
            .push(Adjacency::new(hello.source_id, hello.source_snpa, level, now));
    }

    {
        let adj = circuit
            .level_mut(level)
            .adjacencies
            .iter_mut()
            .find(|a| a.system_id == hello.source_id)
            .unwrap();
        priority_changed = adj.priority != hello.priority;
        adj.snpa = hello.source_snpa;
        adj.priority = hello.priority;
        adj.lan_id = Some(hello.lan_id);
        adj.usage = hello.circuit_type;
        adj.system_type = match level {
            Level::L1 => SystemType::Level1IntermediateSystem,
            Level::L2 => SystemType::Level2IntermediateSystem,
        };
        adj.holding_time = hello.holding_time;
        adj.area_addresses = hello.area_addresses.clone();
        adj.ipv4_addresses = hello.ipv4_addresses.clone();
        adj.ipv6_addresses = hello.ipv6_addresses.clone();
        adj.families = hello.families.clone();
        adj.last_update = now;
        adj.expires_at = now + hello.holding_time;
    }

    // Two-way check: we are up only while the neighbor lists our SNPA
    let two_way = hello.seen_snpas.contains(&our_snpa);
    let current = lookup_by_sysid(circuit, level, hello.source_id)
        .map(|a| a.state)
        .unwrap();
    let desired = if two_way {
        AdjacencyState::Up
    } else {
        AdjacencyState::Initializing
    };
    if current != desired {
        let reason = if two_way {
            "two-way connectivity"
        } else {
            "one-way connectivity"
        };
        result.merge(state_change(
            circuit,
            level,
            hello.source_id,
            desired,
            reason,
            now,
            logger,
        ));
    }

    // Every accepted hello restarts the hold timer
    result.add_timer(TimerRequest {
        timer_type: TimerType::AdjacencyHold {
            interface: circuit.interface.clone(),
            level,
            system_id: hello.source_id,
        },
        fire_at: now + hello.holding_time,
        replace_existing: true,
    });

    rebuild_neighbor_snpas(circuit, level);
    if is_new || priority_changed {
        circuit.level_mut(level).dr.election_pending = true;
    }

    result
}

/// Process a parsed point-to-point hello.
pub fn process_p2p_hello(
    circuit: &mut Circuit,
    hello: &P2pHello,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();

    if circuit.state != CircuitState::Up {
        log_warning!(
            logger,
            Facility::Adjacency,
            &format!("{}: P2P hello on circuit that is not up", circuit.interface)
        );
        return result;
    }
    if circuit.medium != Medium::PointToPoint {
        log_warning!(
            logger,
            Facility::Adjacency,
            &format!("{}: P2P hello on non-point-to-point circuit", circuit.interface)
        );
        return result;
    }
    let Some(usage) = hello.circuit_type.intersect(circuit.usage) else {
        log_warning!(
            logger,
            Facility::Adjacency,
            &format!(
                "{}: no common level with neighbor {} ({} vs {})",
                circuit.interface, hello.source_id, hello.circuit_type, circuit.usage
            )
        );
        return result;
    };
    let level = usage.levels().next().expect("usage has at least one level");

    if let Some(existing) = &circuit.p2p_neighbor {
        if existing.system_id != hello.source_id {
            let (old_level, old_id) = (existing.level, existing.system_id);
            result.merge(state_change(
                circuit,
                old_level,
                old_id,
                AdjacencyState::Down,
                "neighbor replaced",
                now,
                logger,
            ));
        }
    }

    if circuit.p2p_neighbor.is_none() {
        log_debug!(
            logger,
            Facility::Adjacency,
            &format!("{}: new neighbor {}", circuit.interface, hello.source_id)
        );
        circuit.p2p_neighbor = Some(Adjacency::new(hello.source_id, Snpa::ZERO, level, now));
    }

    let current = circuit.p2p_neighbor.as_ref().unwrap().state;
    match current {
        AdjacencyState::Unknown => {
            result.merge(state_change(
                circuit,
                level,
                hello.source_id,
                AdjacencyState::Initializing,
                "p2p hello received",
                now,
                logger,
            ));
        }
        AdjacencyState::Initializing => {
            result.merge(state_change(
                circuit,
                level,
                hello.source_id,
                AdjacencyState::Up,
                "p2p adjacency established",
                now,
                logger,
            ));
        }
        AdjacencyState::Up | AdjacencyState::Down => {}
    }

    if let Some(adj) = circuit.p2p_neighbor.as_mut() {
        adj.usage = usage;
        adj.system_type = if hello.circuit_type.has(Level::L2) {
            SystemType::Level2IntermediateSystem
        } else {
            SystemType::Level1IntermediateSystem
        };
        adj.holding_time = hello.holding_time;
        adj.area_addresses = hello.area_addresses.clone();
        adj.ipv4_addresses = hello.ipv4_addresses.clone();
        adj.ipv6_addresses = hello.ipv6_addresses.clone();
        adj.families = hello.families.clone();
        adj.last_update = now;
        adj.expires_at = now + hello.holding_time;

        result.add_timer(TimerRequest {
            timer_type: TimerType::AdjacencyHold {
                interface: circuit.interface.clone(),
                level,
                system_id: hello.source_id,
            },
            fire_at: now + hello.holding_time,
            replace_existing: true,
        });
    }

    result
}

/// Rebuild the circuit's neighbor-SNPA list for one level.
fn rebuild_neighbor_snpas(circuit: &mut Circuit, level: Level) {
    let snpas: Vec<Snpa> = circuit
        .level(level)
        .adjacencies
        .iter()
        .filter(|a| !a.snpa.is_zero())
        .map(|a| a.snpa)
        .collect();
    circuit.level_mut(level).neighbor_snpas = snpas;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::InterfaceInfo;

    pub(crate) const LOCAL_SNPA: &str = "aa:00:00:00:00:01";

    pub(crate) fn test_logger() -> Logger {
        Logger::ring(256).0
    }

    pub(crate) fn up_broadcast_circuit() -> Circuit {
        let config = Config::parse(
            r#"{
                system_id: "0000.0000.0001",
                area_tag: "test",
                interfaces: [{ name: "eth0" }],
            }"#,
        )
        .unwrap();
        let mut circuit = Circuit::new(
            config.interface("eth0").unwrap(),
            LevelUsage::Level1And2,
            1,
            CircuitState::Up,
        );
        circuit.iface = Some(InterfaceInfo {
            ifindex: 3,
            mtu: 1500,
            snpa: Some(LOCAL_SNPA.parse().unwrap()),
            prefixes: vec!["10.0.0.1/24".parse().unwrap()],
        });
        circuit
    }

    pub(crate) fn up_p2p_circuit() -> Circuit {
        let config = Config::parse(
            r#"{
                system_id: "0000.0000.0001",
                area_tag: "test",
                interfaces: [{ name: "ser0", medium: "point-to-point" }],
            }"#,
        )
        .unwrap();
        let mut circuit = Circuit::new(
            config.interface("ser0").unwrap(),
            LevelUsage::Level1And2,
            2,
            CircuitState::Up,
        );
        circuit.iface = Some(InterfaceInfo {
            ifindex: 4,
            mtu: 1500,
            snpa: None,
            prefixes: vec!["10.0.1.1/30".parse().unwrap()],
        });
        circuit
    }

    pub(crate) fn sysid(last: u8) -> SystemId {
        SystemId([0, 0, 0, 0, 0, last])
    }

    pub(crate) fn snpa(last: u8) -> Snpa {
        Snpa([0xaa, 0, 0, 0, 0, last])
    }

    pub(crate) fn lan_hello(from: u8, priority: u8, seen: Vec<Snpa>) -> LanHello {
        LanHello {
            source_id: sysid(from),
            source_snpa: snpa(from),
            circuit_type: LevelUsage::Level1And2,
            priority,
            holding_time: Duration::from_secs(30),
            lan_id: LanId::new(sysid(from), 0),
            area_addresses: vec!["49.0001".parse().unwrap()],
            seen_snpas: seen,
            ipv4_addresses: vec!["10.0.0.9".parse().unwrap()],
            ipv6_addresses: Vec::new(),
            families: vec![AddressFamily::Ipv4],
        }
    }

    fn p2p_hello(from: u8) -> P2pHello {
        P2pHello {
            source_id: sysid(from),
            circuit_type: LevelUsage::Level1And2,
            holding_time: Duration::from_secs(30),
            area_addresses: vec!["49.0001".parse().unwrap()],
            ipv4_addresses: vec!["10.0.1.2".parse().unwrap()],
            ipv6_addresses: Vec::new(),
            families: vec![AddressFamily::Ipv4],
        }
    }

    #[test]
    fn test_first_hello_creates_initializing_adjacency() {
        let logger = test_logger();
        let mut circuit = up_broadcast_circuit();
        let now = Instant::now();

        let result = process_lan_hello(
            &mut circuit,
            Level::L1,
            &lan_hello(9, 64, Vec::new()),
            now,
            &logger,
        );

        let adj = lookup_by_sysid(&circuit, Level::L1, sysid(9)).unwrap();
        assert_eq!(adj.state, AdjacencyState::Initializing);
        assert_eq!(adj.priority, 64);
        assert_eq!(circuit.level(Level::L1).up_adjacency_count, 0);
        // DIS history starts all-unknown
        assert!(adj.dis_history[Level::L1.index()]
            .iter()
            .all(|r| r.status == DisStatus::Unknown));
        // Hold timer armed
        assert!(result
            .timers
            .iter()
            .any(|t| matches!(&t.timer_type, TimerType::AdjacencyHold { system_id, .. } if *system_id == sysid(9))));
        assert!(circuit.level(Level::L1).dr.election_pending);
    }

    #[test]
    fn test_two_way_hello_brings_adjacency_up() {
        let logger = test_logger();
        let mut circuit = up_broadcast_circuit();
        let now = Instant::now();
        let local: Snpa = LOCAL_SNPA.parse().unwrap();

        process_lan_hello(&mut circuit, Level::L1, &lan_hello(9, 64, Vec::new()), now, &logger);
        let result = process_lan_hello(
            &mut circuit,
            Level::L1,
            &lan_hello(9, 64, vec![local]),
            now,
            &logger,
        );

        let adj = lookup_by_sysid(&circuit, Level::L1, sysid(9)).unwrap();
        assert_eq!(adj.state, AdjacencyState::Up);
        assert_eq!(adj.flaps, 1);
        assert_eq!(circuit.level(Level::L1).up_adjacency_count, 1);
        assert!(result.notifications.iter().any(|n| matches!(
            n,
            EngineNotification::AdjacencyStateChanged {
                new_state: AdjacencyState::Up,
                ..
            }
        )));
        assert_eq!(circuit.level(Level::L1).neighbor_snpas, vec![snpa(9)]);
    }

    #[test]
    fn test_losing_two_way_drops_back_to_initializing() {
        let logger = test_logger();
        let mut circuit = up_broadcast_circuit();
        let now = Instant::now();
        let local: Snpa = LOCAL_SNPA.parse().unwrap();

        process_lan_hello(&mut circuit, Level::L1, &lan_hello(9, 64, vec![local]), now, &logger);
        process_lan_hello(&mut circuit, Level::L1, &lan_hello(9, 64, vec![local]), now, &logger);
        assert_eq!(circuit.level(Level::L1).up_adjacency_count, 1);

        process_lan_hello(&mut circuit, Level::L1, &lan_hello(9, 64, Vec::new()), now, &logger);
        let adj = lookup_by_sysid(&circuit, Level::L1, sysid(9)).unwrap();
        assert_eq!(adj.state, AdjacencyState::Initializing);
    }

    #[test]
    fn test_hold_expiry_destroys_adjacency() {
        let logger = test_logger();
        let mut circuit = up_broadcast_circuit();
        let now = Instant::now();
        let local: Snpa = LOCAL_SNPA.parse().unwrap();

        process_lan_hello(&mut circuit, Level::L1, &lan_hello(9, 64, vec![local]), now, &logger);
        assert_eq!(circuit.level(Level::L1).up_adjacency_count, 1);

        let result = hold_timer_expired(&mut circuit, Level::L1, sysid(9), now, &logger);

        // DOWN is terminal: the adjacency is unreachable from any collection
        assert!(lookup_by_sysid(&circuit, Level::L1, sysid(9)).is_none());
        assert!(lookup_by_snpa(&circuit, Level::L1, snpa(9)).is_none());
        assert_eq!(circuit.level(Level::L1).up_adjacency_count, 0);
        assert!(circuit.level(Level::L1).neighbor_snpas.is_empty());
        assert!(result.cancels.iter().any(|c| matches!(
            c,
            TimerCancel::One(TimerType::AdjacencyHold { system_id, .. }) if *system_id == sysid(9)
        )));
    }

    #[test]
    fn test_last_up_adjacency_down_purges_tx_queue() {
        let logger = test_logger();
        let mut circuit = up_broadcast_circuit();
        let now = Instant::now();
        let local: Snpa = LOCAL_SNPA.parse().unwrap();

        process_lan_hello(&mut circuit, Level::L1, &lan_hello(9, 64, vec![local]), now, &logger);
        circuit.lsp_tx_queue.push(crate::LspId::base(LanId::system(sysid(1))));

        hold_timer_expired(&mut circuit, Level::L1, sysid(9), now, &logger);
        assert!(
            circuit.lsp_tx_queue.is_empty(),
            "queued LSPs have nothing to flood to"
        );
    }

    #[test]
    fn test_pseudonode_regenerated_when_dr() {
        let logger = test_logger();
        let mut circuit = up_broadcast_circuit();
        let now = Instant::now();
        let local: Snpa = LOCAL_SNPA.parse().unwrap();
        circuit.level_mut(Level::L1).dr.is_dr = true;

        let result = process_lan_hello(
            &mut circuit,
            Level::L1,
            &lan_hello(9, 64, vec![local]),
            now,
            &logger,
        );
        assert!(result.actions.iter().any(|a| matches!(
            a,
            EngineAction::GeneratePseudonode { level: Level::L1, .. }
        )));
    }

    #[test]
    fn test_hello_for_disabled_level_rejected() {
        let logger = test_logger();
        let mut circuit = up_broadcast_circuit();
        circuit.usage = LevelUsage::Level1;
        let now = Instant::now();

        let result = process_lan_hello(
            &mut circuit,
            Level::L2,
            &lan_hello(9, 64, Vec::new()),
            now,
            &logger,
        );
        assert!(result.is_empty());
        assert!(circuit.level(Level::L2).adjacencies.is_empty());
    }

    #[test]
    fn test_p2p_adjacency_establishes_in_two_hellos() {
        let logger = test_logger();
        let mut circuit = up_p2p_circuit();
        let now = Instant::now();

        process_p2p_hello(&mut circuit, &p2p_hello(7), now, &logger);
        assert_eq!(
            circuit.p2p_neighbor.as_ref().unwrap().state,
            AdjacencyState::Initializing
        );

        let result = process_p2p_hello(&mut circuit, &p2p_hello(7), now, &logger);
        let adj = circuit.p2p_neighbor.as_ref().unwrap();
        assert_eq!(adj.state, AdjacencyState::Up);
        assert_eq!(adj.system_type, SystemType::Level2IntermediateSystem);
        // Establishment emits a fresh hello and an immediate CSNP
        assert!(result
            .sends
            .iter()
            .any(|s| matches!(s, PduSend::P2pHello { .. })));
        assert!(result.sends.iter().any(|s| matches!(s, PduSend::Csnp { .. })));
    }

    #[test]
    fn test_p2p_neighbor_replacement() {
        let logger = test_logger();
        let mut circuit = up_p2p_circuit();
        let now = Instant::now();

        process_p2p_hello(&mut circuit, &p2p_hello(7), now, &logger);
        process_p2p_hello(&mut circuit, &p2p_hello(7), now, &logger);

        let result = process_p2p_hello(&mut circuit, &p2p_hello(8), now, &logger);
        let adj = circuit.p2p_neighbor.as_ref().unwrap();
        assert_eq!(adj.system_id, sysid(8));
        assert_eq!(adj.state, AdjacencyState::Initializing);
        assert!(result.notifications.iter().any(|n| matches!(
            n,
            EngineNotification::AdjacencyStateChanged {
                system_id,
                new_state: AdjacencyState::Down,
                ..
            } if *system_id == sysid(7)
        )));
    }

    #[test]
    fn test_dis_history_ring_drops_oldest() {
        let now = Instant::now();
        let mut history = DisHistory::new(now);
        for i in 0..DIS_RECORD_COUNT + 2 {
            let status = if i % 2 == 0 {
                DisStatus::IsDis
            } else {
                DisStatus::NotDis
            };
            history.push(status, now);
        }
        assert_eq!(history.iter().count(), DIS_RECORD_COUNT);
        // All seeded unknown records have been pushed out
        assert!(history.iter().all(|r| r.status != DisStatus::Unknown));
    }

    #[test]
    fn test_states_stay_within_machine() {
        // Drive an adjacency through a full lifecycle and check every
        // observed state is a member of the machine's state set.
        let logger = test_logger();
        let mut circuit = up_broadcast_circuit();
        let now = Instant::now();
        let local: Snpa = LOCAL_SNPA.parse().unwrap();

        let mut observed = Vec::new();
        let mut record = |c: &Circuit| {
            if let Some(adj) = lookup_by_sysid(c, Level::L1, sysid(9)) {
                observed.push(adj.state);
            }
        };

        process_lan_hello(&mut circuit, Level::L1, &lan_hello(9, 10, Vec::new()), now, &logger);
        record(&circuit);
        process_lan_hello(&mut circuit, Level::L1, &lan_hello(9, 10, vec![local]), now, &logger);
        record(&circuit);
        process_lan_hello(&mut circuit, Level::L1, &lan_hello(9, 10, Vec::new()), now, &logger);
        record(&circuit);
        hold_timer_expired(&mut circuit, Level::L1, sysid(9), now, &logger);
        record(&circuit);

        assert!(observed.iter().all(|s| matches!(
            s,
            AdjacencyState::Unknown
                | AdjacencyState::Initializing
                | AdjacencyState::Up
                | AdjacencyState::Down
        )));
        assert!(lookup_by_sysid(&circuit, Level::L1, sysid(9)).is_none());
    }
}
