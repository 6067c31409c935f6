// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Per-area engine state
//!
//! An [`Area`] owns the circuits, per-level link-state databases, SPF trees,
//! and route tables of one routing area, and applies the actions handlers
//! request. Notifications produced while applying are drained through a work
//! queue instead of recursion, so a cascade of state changes can never
//! re-enter a computation that is conceptually in progress.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::{Config, InterfaceConfig};
use crate::instance::actions::{
    EngineAction, EngineNotification, EngineOutput, HandlerResult, PduSend,
};
use crate::logging::{Facility, Logger};
use crate::lsdb::{IsNeighbor, LspDb, LspPayload, PrefixReach};
use crate::protocol::adjacency::{self, AdjacencyState};
use crate::protocol::circuit::{self, Circuit, CircuitState, CsmEvent};
use crate::protocol::{election, events};
use crate::protocol::{
    TimerRequest, TimerType, CSNP_JITTER, DR_ELECTION_HELLO_MULTIPLE, HELLO_JITTER, PSNP_JITTER,
};
use crate::rib::RouteTable;
use crate::spf::{SpfInputs, SpfSchedule, SpfTree};
use crate::{
    jittered, AddressFamily, AreaAddress, LanId, Level, LevelUsage, LspId, Medium, MetricStyle,
    SystemId, LEVEL_COUNT,
};
use crate::{log_debug, log_info};

/// Batching delay between a topology change and local LSP regeneration.
pub const LSP_REGEN_DELAY: Duration = Duration::from_millis(500);

/// One routing area: circuits, databases, trees, and tables.
pub struct Area {
    pub tag: String,
    /// Levels this system routes at within the area
    pub usage: LevelUsage,
    pub metric_style: MetricStyle,
    pub area_addresses: Vec<AreaAddress>,
    pub spf_min_interval: Duration,
    pub lsp_refresh_interval: Duration,
    /// Circuits by interface name; absence means the state machine's
    /// not-active state
    pub circuits: HashMap<String, Circuit>,
    lsdb: [LspDb; LEVEL_COUNT],
    spf: [[SpfTree; 2]; LEVEL_COUNT],
    routes: [[RouteTable; 2]; LEVEL_COUNT],
    lsp_regen_pending: [bool; LEVEL_COUNT],
    /// Diagnostic counter of circuit state transitions
    pub circuit_state_changes: u64,
    /// Stable local circuit ids per interface
    circuit_ids: HashMap<String, u8>,
    next_circuit_id: u8,
}

impl Area {
    pub fn new(config: &Config) -> Self {
        Self {
            tag: config.area_tag.clone(),
            usage: config.level_usage,
            metric_style: config.metric_style,
            area_addresses: config.area_addresses.clone(),
            spf_min_interval: config.spf_min_interval(),
            lsp_refresh_interval: config.lsp_refresh_interval(),
            circuits: HashMap::new(),
            lsdb: Default::default(),
            spf: Default::default(),
            routes: Default::default(),
            lsp_regen_pending: [false; LEVEL_COUNT],
            circuit_state_changes: 0,
            circuit_ids: HashMap::new(),
            next_circuit_id: 1,
        }
    }

    pub fn circuit(&self, interface: &str) -> Option<&Circuit> {
        self.circuits.get(interface)
    }

    pub fn lsdb(&self, level: Level) -> &LspDb {
        &self.lsdb[level.index()]
    }

    pub fn lsdb_mut(&mut self, level: Level) -> &mut LspDb {
        &mut self.lsdb[level.index()]
    }

    pub fn spf_tree(&self, level: Level, family: AddressFamily) -> &SpfTree {
        &self.spf[level.index()][family.index()]
    }

    pub fn route_table(&self, level: Level, family: AddressFamily) -> &RouteTable {
        &self.routes[level.index()][family.index()]
    }

    /// Reset every piece of computed and learned state for one level.
    pub fn destroy_level(&mut self, level: Level) {
        let i = level.index();
        self.lsdb[i] = LspDb::new();
        for family in AddressFamily::all() {
            self.spf[i][family.index()].reset();
            self.routes[i][family.index()].clear();
        }
        self.lsp_regen_pending[i] = false;
    }

    fn circuit_id_for(&mut self, interface: &str) -> u8 {
        if let Some(id) = self.circuit_ids.get(interface) {
            return *id;
        }
        let id = self.next_circuit_id;
        self.next_circuit_id = self.next_circuit_id.wrapping_add(1).max(1);
        self.circuit_ids.insert(interface.to_string(), id);
        id
    }

    /// Drive the circuit lifecycle state machine for one interface.
    pub fn circuit_event(
        &mut self,
        cfg: &InterfaceConfig,
        system_id: SystemId,
        event: CsmEvent,
        now: Instant,
        logger: &Logger,
    ) -> HandlerResult {
        let circuit_id = self.circuit_id_for(&cfg.name);
        let mut slot = self.circuits.remove(&cfg.name);
        let result = circuit::csm_state_change(
            &mut slot, &cfg.name, event, cfg, self.usage, system_id, circuit_id, now, logger,
        );
        if let Some(circuit) = slot {
            self.circuits.insert(cfg.name.clone(), circuit);
        }
        result
    }

    /// Build the local (non-pseudonode) LSP payload for one level.
    pub fn build_local_lsp(&self, level: Level) -> LspPayload {
        let mut payload = LspPayload {
            area_addresses: self.area_addresses.clone(),
            ..Default::default()
        };

        let mut names: Vec<&String> = self.circuits.keys().collect();
        names.sort();
        for name in names {
            let circuit = &self.circuits[name.as_str()];
            if circuit.state != CircuitState::Up || !circuit.is_enabled(level) {
                continue;
            }
            let metric = circuit.level(level).metric;

            match circuit.medium {
                Medium::PointToPoint => {
                    if let Some(adj) = &circuit.p2p_neighbor {
                        if adj.state == AdjacencyState::Up && adj.usage.has(level) {
                            payload.is_neighbors.push(IsNeighbor {
                                neighbor: LanId::system(adj.system_id),
                                metric,
                            });
                        }
                    }
                }
                Medium::Broadcast => {
                    // The segment is reached through its pseudonode
                    if circuit.level(level).up_adjacency_count > 0
                        || circuit.level(level).dr.is_dr
                    {
                        if let Some(dis) = circuit.level(level).dr.dis {
                            payload.is_neighbors.push(IsNeighbor {
                                neighbor: dis,
                                metric,
                            });
                        }
                    }
                }
                Medium::Loopback => {}
            }

            if let Some(iface) = &circuit.iface {
                for prefix in &iface.prefixes {
                    payload.prefixes.push(PrefixReach {
                        prefix: *prefix,
                        metric,
                    });
                }
            }
        }

        payload
    }

    /// Build the pseudonode LSP for a circuit this system is DIS on.
    /// Pseudonode edges carry zero cost.
    pub fn build_pseudonode_lsp(
        &self,
        system_id: SystemId,
        interface: &str,
        level: Level,
    ) -> Option<(LspId, LspPayload)> {
        let circuit = self.circuits.get(interface)?;
        if !circuit.level(level).dr.is_dr {
            return None;
        }
        let lan_id = LanId::new(system_id, circuit.circuit_id);
        let mut payload = LspPayload::default();
        payload.is_neighbors.push(IsNeighbor {
            neighbor: LanId::system(system_id),
            metric: 0,
        });
        for adj in circuit
            .level(level)
            .adjacencies
            .iter()
            .filter(|a| a.state == AdjacencyState::Up)
        {
            payload.is_neighbors.push(IsNeighbor {
                neighbor: LanId::system(adj.system_id),
                metric: 0,
            });
        }
        Some((LspId::base(lan_id), payload))
    }

    /// Rebuild and install the local LSP for one level, restart the refresh
    /// timer, and request recomputation.
    pub fn regenerate_local_lsp(
        &mut self,
        system_id: SystemId,
        level: Level,
        now: Instant,
        logger: &Logger,
    ) -> HandlerResult {
        let payload = self.build_local_lsp(level);
        let lsp_id = LspId::base(LanId::system(system_id));
        let seq = self.lsdb[level.index()].install_own(lsp_id, payload, now);
        self.lsp_regen_pending[level.index()] = false;
        log_debug!(
            logger,
            Facility::Lsdb,
            &format!("{}: local {level} LSP regenerated, sequence {seq}", self.tag)
        );

        let mut result = HandlerResult::new();
        result.add_timer(TimerRequest {
            timer_type: TimerType::LspRefresh { level },
            fire_at: now + self.lsp_refresh_interval,
            replace_existing: true,
        });
        for family in AddressFamily::all() {
            result.add_action(EngineAction::ScheduleSpf { level, family });
        }
        result
    }

    /// Run SPF for one (level, family) and install the resulting routes.
    pub fn run_spf(
        &mut self,
        system_id: SystemId,
        level: Level,
        family: AddressFamily,
        now: Instant,
        logger: &Logger,
    ) {
        let inputs = SpfInputs {
            system_id,
            level,
            family,
            metric_style: self.metric_style,
            circuits: &self.circuits,
            lsdb: &self.lsdb[level.index()],
        };
        let tree = &mut self.spf[level.index()][family.index()];
        let run = tree.run(&inputs, now, logger);

        let delta = self.routes[level.index()][family.index()].replace_all(run.routes);
        log_info!(
            logger,
            Facility::Spf,
            &format!(
                "{} {level} {family}: spf #{} finalized {} vertices in {:?} (+{} ~{} -{} routes)",
                self.tag,
                self.spf[level.index()][family.index()].runcount,
                run.finalized_count,
                run.duration,
                delta.added,
                delta.changed,
                delta.removed
            )
        );
    }

    /// Apply a handler result: actions mutate this area (possibly producing
    /// more results), notifications feed the event dispatcher. The remaining
    /// timer and transmit traffic is returned for the engine shell.
    pub fn process_result(
        &mut self,
        result: HandlerResult,
        system_id: SystemId,
        now: Instant,
        logger: &Logger,
    ) -> EngineOutput {
        let mut output = EngineOutput::default();
        let mut queue: VecDeque<HandlerResult> = VecDeque::new();
        queue.push_back(result);

        while let Some(item) = queue.pop_front() {
            output.timers.extend(item.timers);
            output.cancels.extend(item.cancels);
            output.sends.extend(item.sends);
            for action in item.actions {
                if let Some(more) = self.apply_action(action, system_id, now, logger) {
                    if !more.is_empty() {
                        queue.push_back(more);
                    }
                }
            }
            for notification in item.notifications {
                let more = self.dispatch(notification, system_id, now, logger);
                if !more.is_empty() {
                    queue.push_back(more);
                }
            }
        }
        output
    }

    fn dispatch(
        &mut self,
        notification: EngineNotification,
        system_id: SystemId,
        now: Instant,
        logger: &Logger,
    ) -> HandlerResult {
        let _ = (system_id, now);
        match notification {
            EngineNotification::CircuitStateChanged { interface, up } => {
                events::circuit_state_changed(self, &interface, up, logger)
            }
            EngineNotification::AdjacencyStateChanged {
                interface,
                level,
                system_id,
                new_state,
            } => events::adjacency_state_changed(
                self, &interface, level, system_id, new_state, logger,
            ),
            EngineNotification::DisStatusChanged { interface, level } => {
                events::dis_status_changed(self, &interface, level, logger)
            }
        }
    }

    fn apply_action(
        &mut self,
        action: EngineAction,
        system_id: SystemId,
        now: Instant,
        logger: &Logger,
    ) -> Option<HandlerResult> {
        match action {
            EngineAction::ScheduleLspRegen { usage } => {
                let mut result = HandlerResult::new();
                for level in usage.levels().filter(|l| self.usage.has(*l)) {
                    if !self.lsp_regen_pending[level.index()] {
                        self.lsp_regen_pending[level.index()] = true;
                        result.add_timer(TimerRequest {
                            timer_type: TimerType::LspRegenerate { level },
                            fire_at: now + LSP_REGEN_DELAY,
                            replace_existing: true,
                        });
                    }
                }
                Some(result)
            }
            EngineAction::RegenerateLocalLsp { level } => {
                if !self.usage.has(level) {
                    return None;
                }
                Some(self.regenerate_local_lsp(system_id, level, now, logger))
            }
            EngineAction::GeneratePseudonode { interface, level } => {
                let (lsp_id, payload) =
                    self.build_pseudonode_lsp(system_id, &interface, level)?;
                let seq = self.lsdb[level.index()].install_own(lsp_id, payload, now);
                log_debug!(
                    logger,
                    Facility::Lsdb,
                    &format!("{interface} {level}: pseudonode LSP {lsp_id} sequence {seq}")
                );
                let mut result = HandlerResult::new();
                for family in AddressFamily::all() {
                    result.add_action(EngineAction::ScheduleSpf { level, family });
                }
                Some(result)
            }
            EngineAction::PurgePseudonode { lan_id, level } => {
                if !self.usage.has(level) {
                    return None;
                }
                let purged = self.lsdb[level.index()].purge_lan(lan_id, now);
                log_debug!(
                    logger,
                    Facility::Lsdb,
                    &format!("{level}: purged {purged} pseudonode fragment(s) of {lan_id}")
                );
                let mut result = HandlerResult::new();
                for family in AddressFamily::all() {
                    result.add_action(EngineAction::ScheduleSpf { level, family });
                }
                Some(result)
            }
            EngineAction::ScheduleSpf { level, family } => {
                if !self.usage.has(level) {
                    return None;
                }
                let min_interval = self.spf_min_interval;
                match self.spf[level.index()][family.index()]
                    .schedule(level, family, min_interval, now)
                {
                    SpfSchedule::RunNow => {
                        self.run_spf(system_id, level, family, now, logger);
                        None
                    }
                    SpfSchedule::Deferred(timer) => Some(HandlerResult::with_timers(vec![timer])),
                    SpfSchedule::AlreadyPending => None,
                }
            }
        }
    }

    /// React to one expired timer.
    pub fn timer_expired(
        &mut self,
        timer: TimerType,
        system_id: SystemId,
        now: Instant,
        logger: &Logger,
    ) -> HandlerResult {
        match timer {
            TimerType::LanHello { interface, level } => {
                let Some(circuit) = self.circuits.get_mut(&interface) else {
                    return HandlerResult::new();
                };
                if circuit.state != CircuitState::Up || !circuit.is_enabled(level) {
                    return HandlerResult::new();
                }
                let mut result = HandlerResult::new();
                // The hello path drains any pending re-election request, so
                // elections never run from inside their own side effects
                if circuit.level(level).dr.election_pending {
                    result.merge(election::elect(circuit, level, system_id, now, logger));
                }
                result.send(PduSend::LanHello {
                    interface: interface.clone(),
                    level,
                });
                result.add_timer(TimerRequest {
                    timer_type: TimerType::LanHello { interface, level },
                    fire_at: now + jittered(circuit.level(level).hello_interval, HELLO_JITTER),
                    replace_existing: true,
                });
                result
            }
            TimerType::P2pHello { interface } => {
                let Some(circuit) = self.circuits.get(&interface) else {
                    return HandlerResult::new();
                };
                if circuit.state != CircuitState::Up {
                    return HandlerResult::new();
                }
                let level = circuit
                    .usage
                    .levels()
                    .next()
                    .unwrap_or(Level::L1);
                let mut result = HandlerResult::new();
                result.send(PduSend::P2pHello {
                    interface: interface.clone(),
                });
                result.add_timer(TimerRequest {
                    timer_type: TimerType::P2pHello { interface },
                    fire_at: now + jittered(circuit.level(level).hello_interval, HELLO_JITTER),
                    replace_existing: true,
                });
                result
            }
            TimerType::Csnp { interface, level } => {
                let Some(circuit) = self.circuits.get(&interface) else {
                    return HandlerResult::new();
                };
                // Periodic CSNPs belong to the DIS alone
                if circuit.state != CircuitState::Up || !circuit.level(level).dr.is_dr {
                    return HandlerResult::new();
                }
                let mut result = HandlerResult::new();
                result.send(PduSend::Csnp {
                    interface: interface.clone(),
                    level,
                });
                result.add_timer(TimerRequest {
                    timer_type: TimerType::Csnp { interface, level },
                    fire_at: now + jittered(circuit.level(level).csnp_interval, CSNP_JITTER),
                    replace_existing: true,
                });
                result
            }
            TimerType::Psnp { interface, level } => {
                let Some(circuit) = self.circuits.get(&interface) else {
                    return HandlerResult::new();
                };
                if circuit.state != CircuitState::Up || !circuit.is_enabled(level) {
                    return HandlerResult::new();
                }
                let mut result = HandlerResult::new();
                // The DIS synchronizes with CSNPs instead
                if !(circuit.medium == Medium::Broadcast && circuit.level(level).dr.is_dr) {
                    result.send(PduSend::Psnp {
                        interface: interface.clone(),
                        level,
                    });
                }
                result.add_timer(TimerRequest {
                    timer_type: TimerType::Psnp { interface, level },
                    fire_at: now + jittered(circuit.level(level).psnp_interval, PSNP_JITTER),
                    replace_existing: true,
                });
                result
            }
            TimerType::DrElection { interface, level } => {
                let Some(circuit) = self.circuits.get_mut(&interface) else {
                    return HandlerResult::new();
                };
                if circuit.state != CircuitState::Up || !circuit.is_enabled(level) {
                    return HandlerResult::new();
                }
                // Only raise the flag; the hello path performs the election
                circuit.level_mut(level).dr.election_pending = true;
                let mut result = HandlerResult::new();
                result.add_timer(TimerRequest {
                    timer_type: TimerType::DrElection { interface, level },
                    fire_at: now
                        + circuit.level(level).hello_interval * DR_ELECTION_HELLO_MULTIPLE,
                    replace_existing: true,
                });
                result
            }
            TimerType::AdjacencyHold {
                interface,
                level,
                system_id: neighbor,
            } => {
                let Some(circuit) = self.circuits.get_mut(&interface) else {
                    return HandlerResult::new();
                };
                adjacency::hold_timer_expired(circuit, level, neighbor, now, logger)
            }
            TimerType::LspRegenerate { level } | TimerType::LspRefresh { level } => {
                if !self.usage.has(level) {
                    return HandlerResult::new();
                }
                self.regenerate_local_lsp(system_id, level, now, logger)
            }
            TimerType::SpfDelay { level, family } => {
                if !self.usage.has(level) {
                    return HandlerResult::new();
                }
                self.spf[level.index()][family.index()].pending = false;
                self.run_spf(system_id, level, family, now, logger);
                HandlerResult::new()
            }
        }
    }

    /// Cancel-everything sweep used at instance shutdown: one cancellation
    /// per circuit plus the per-level area timers.
    pub fn shutdown_cancels(&self) -> Vec<crate::protocol::TimerCancel> {
        let mut cancels: Vec<crate::protocol::TimerCancel> = self
            .circuits
            .keys()
            .map(|name| crate::protocol::TimerCancel::Circuit {
                interface: name.clone(),
            })
            .collect();
        for level in Level::all() {
            cancels.push(crate::protocol::TimerCancel::Level { level });
        }
        cancels
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::InterfaceInfo;

    const LOCAL_ID: SystemId = SystemId([0, 0, 0, 0, 0, 1]);

    fn test_config() -> Config {
        Config::parse(
            r#"{
                system_id: "0000.0000.0001",
                area_tag: "test",
                area_addresses: ["49.0001"],
                interfaces: [
                    { name: "eth0" },
                    { name: "ser0", medium: "point-to-point" },
                ],
            }"#,
        )
        .unwrap()
    }

    fn iface_info() -> InterfaceInfo {
        InterfaceInfo {
            ifindex: 3,
            mtu: 1500,
            snpa: Some("aa:00:00:00:00:01".parse().unwrap()),
            prefixes: vec!["10.0.0.1/24".parse().unwrap()],
        }
    }

    fn up_area(config: &Config, logger: &Logger) -> Area {
        let mut area = Area::new(config);
        let now = Instant::now();
        for name in ["eth0", "ser0"] {
            let cfg = config.interface(name).unwrap().clone();
            area.circuit_event(&cfg, LOCAL_ID, CsmEvent::Enable, now, logger);
            let result = area.circuit_event(
                &cfg,
                LOCAL_ID,
                CsmEvent::InterfaceUp(iface_info()),
                now,
                logger,
            );
            area.process_result(result, LOCAL_ID, now, logger);
        }
        area
    }

    #[test]
    fn test_circuit_ids_are_stable() {
        let logger = Logger::ring(256).0;
        let config = test_config();
        let mut area = Area::new(&config);
        let cfg = config.interface("eth0").unwrap().clone();
        let now = Instant::now();

        area.circuit_event(&cfg, LOCAL_ID, CsmEvent::Enable, now, &logger);
        let first = area.circuit("eth0").unwrap().circuit_id;
        area.circuit_event(&cfg, LOCAL_ID, CsmEvent::Disable, now, &logger);
        assert!(area.circuit("eth0").is_none());
        area.circuit_event(&cfg, LOCAL_ID, CsmEvent::Enable, now, &logger);
        assert_eq!(area.circuit("eth0").unwrap().circuit_id, first);
    }

    #[test]
    fn test_process_result_drains_notification_cascade() {
        let logger = Logger::ring(256).0;
        let config = test_config();
        let mut area = up_area(&config, &logger);
        let now = Instant::now();
        // Bring-up already requested regeneration; start from a clean slate
        area.lsp_regen_pending = [false; LEVEL_COUNT];

        // A circuit-up notification schedules regeneration for both levels
        let mut result = HandlerResult::new();
        result.notify(EngineNotification::CircuitStateChanged {
            interface: "eth0".to_string(),
            up: true,
        });
        let output = area.process_result(result, LOCAL_ID, now, &logger);

        assert!(output
            .timers
            .iter()
            .any(|t| matches!(t.timer_type, TimerType::LspRegenerate { level: Level::L1 })));
        assert!(output
            .timers
            .iter()
            .any(|t| matches!(t.timer_type, TimerType::LspRegenerate { level: Level::L2 })));
        assert!(area.lsp_regen_pending[Level::L1.index()]);

        // A second notification coalesces on the pending flag
        let mut again = HandlerResult::new();
        again.notify(EngineNotification::CircuitStateChanged {
            interface: "eth0".to_string(),
            up: true,
        });
        let output = area.process_result(again, LOCAL_ID, now, &logger);
        assert!(output.timers.is_empty());
    }

    #[test]
    fn test_regenerate_installs_lsp_and_runs_spf() {
        let logger = Logger::ring(256).0;
        let config = test_config();
        let mut area = up_area(&config, &logger);
        let now = Instant::now();

        let result = area.regenerate_local_lsp(LOCAL_ID, Level::L1, now, &logger);
        let output = area.process_result(result, LOCAL_ID, now, &logger);

        let lsp_id = LspId::base(LanId::system(LOCAL_ID));
        let entry = area.lsdb(Level::L1).get(&lsp_id).expect("own LSP installed");
        assert!(entry.own);
        assert!(entry
            .payload
            .prefixes
            .iter()
            .any(|p| p.prefix == "10.0.0.1/24".parse().unwrap()));
        // First run executed immediately (no prior run to rate-limit against)
        assert_eq!(area.spf_tree(Level::L1, AddressFamily::Ipv4).runcount, 1);
        // Refresh timer armed
        assert!(output
            .timers
            .iter()
            .any(|t| matches!(t.timer_type, TimerType::LspRefresh { level: Level::L1 })));
    }

    #[test]
    fn test_spf_rate_limit_defers_second_run() {
        let logger = Logger::ring(256).0;
        let config = test_config();
        let mut area = up_area(&config, &logger);
        let now = Instant::now();

        area.run_spf(LOCAL_ID, Level::L1, AddressFamily::Ipv4, now, &logger);
        assert_eq!(area.spf_tree(Level::L1, AddressFamily::Ipv4).runcount, 1);

        let mut result = HandlerResult::new();
        result.add_action(EngineAction::ScheduleSpf {
            level: Level::L1,
            family: AddressFamily::Ipv4,
        });
        let output = area.process_result(result, LOCAL_ID, now, &logger);

        // Within the minimum interval: deferred, not run
        assert_eq!(area.spf_tree(Level::L1, AddressFamily::Ipv4).runcount, 1);
        assert!(area.spf_tree(Level::L1, AddressFamily::Ipv4).pending);
        let deferred = output
            .timers
            .iter()
            .find(|t| matches!(t.timer_type, TimerType::SpfDelay { .. }))
            .expect("delay timer armed");
        assert_eq!(deferred.fire_at, now + area.spf_min_interval);

        // Timer fires: the pending run executes
        let result = area.timer_expired(
            TimerType::SpfDelay {
                level: Level::L1,
                family: AddressFamily::Ipv4,
            },
            LOCAL_ID,
            deferred.fire_at,
            &logger,
        );
        assert!(result.is_empty());
        assert_eq!(area.spf_tree(Level::L1, AddressFamily::Ipv4).runcount, 2);
        assert!(!area.spf_tree(Level::L1, AddressFamily::Ipv4).pending);
    }

    #[test]
    fn test_lan_hello_timer_drains_pending_election() {
        let logger = Logger::ring(256).0;
        let config = test_config();
        let mut area = up_area(&config, &logger);
        let now = Instant::now();

        // The DR election timer only raises the flag
        let result = area.timer_expired(
            TimerType::DrElection {
                interface: "eth0".to_string(),
                level: Level::L1,
            },
            LOCAL_ID,
            now,
            &logger,
        );
        assert!(area.circuit("eth0").unwrap().level(Level::L1).dr.election_pending);
        assert!(result
            .timers
            .iter()
            .any(|t| matches!(t.timer_type, TimerType::DrElection { .. })));

        // The hello path performs it and clears the flag
        let result = area.timer_expired(
            TimerType::LanHello {
                interface: "eth0".to_string(),
                level: Level::L1,
            },
            LOCAL_ID,
            now,
            &logger,
        );
        let circuit = area.circuit("eth0").unwrap();
        assert!(!circuit.level(Level::L1).dr.election_pending);
        assert!(result
            .sends
            .iter()
            .any(|s| matches!(s, PduSend::LanHello { .. })));
    }

    #[test]
    fn test_election_commences_over_low_priority_neighbor() {
        let logger = Logger::ring(256).0;
        let config = test_config();
        let mut area = up_area(&config, &logger);
        let now = Instant::now();

        // One low-priority neighbor on the segment; the local circuit's
        // default priority outranks it
        let hello = crate::protocol::LanHello {
            source_id: SystemId([0, 0, 0, 0, 0, 9]),
            source_snpa: "aa:00:00:00:00:09".parse().unwrap(),
            circuit_type: LevelUsage::Level1And2,
            priority: 10,
            holding_time: Duration::from_secs(30),
            lan_id: LanId::system(SystemId([0, 0, 0, 0, 0, 9])),
            area_addresses: vec!["49.0001".parse().unwrap()],
            seen_snpas: vec!["aa:00:00:00:00:01".parse().unwrap()],
            ipv4_addresses: Vec::new(),
            ipv6_addresses: Vec::new(),
            families: vec![AddressFamily::Ipv4],
        };
        let result = adjacency::process_lan_hello(
            area.circuits.get_mut("eth0").unwrap(),
            Level::L1,
            &hello,
            now,
            &logger,
        );
        area.process_result(result, LOCAL_ID, now, &logger);

        // The hello receipt requested an election; the hello path runs it
        let result = area.timer_expired(
            TimerType::LanHello {
                interface: "eth0".to_string(),
                level: Level::L1,
            },
            LOCAL_ID,
            now,
            &logger,
        );
        let output = area.process_result(result, LOCAL_ID, now, &logger);

        let circuit = area.circuit("eth0").unwrap();
        assert!(circuit.level(Level::L1).dr.is_dr);
        // Commencing installed a pseudonode LSP
        let pseudo = LspId::base(LanId::new(LOCAL_ID, circuit.circuit_id));
        assert!(area.lsdb(Level::L1).get(&pseudo).is_some());
        // And the CSNP timer is now running
        assert!(output
            .timers
            .iter()
            .any(|t| matches!(t.timer_type, TimerType::Csnp { .. })));
    }

    #[test]
    fn test_stale_circuit_timer_is_harmless() {
        let logger = Logger::ring(256).0;
        let config = test_config();
        let mut area = up_area(&config, &logger);
        let now = Instant::now();

        let result = area.timer_expired(
            TimerType::LanHello {
                interface: "gone0".to_string(),
                level: Level::L1,
            },
            LOCAL_ID,
            now,
            &logger,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn test_shutdown_cancels_cover_circuits_and_levels() {
        let logger = Logger::ring(256).0;
        let config = test_config();
        let area = up_area(&config, &logger);

        let cancels = area.shutdown_cancels();
        assert!(cancels.contains(&crate::protocol::TimerCancel::Circuit {
            interface: "eth0".to_string()
        }));
        assert!(cancels.contains(&crate::protocol::TimerCancel::Circuit {
            interface: "ser0".to_string()
        }));
        assert!(cancels.contains(&crate::protocol::TimerCancel::Level { level: Level::L2 }));
    }
}
