// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Circuit lifecycle state machine
//!
//! A circuit is a protocol-enabled interface. It exists only while at least
//! one of administrative configuration and operational connectivity is
//! present, and runs the protocol only when it has both:
//!
//! | State | Configured | Connected |
//! |-------|-----------|-----------|
//! | (absent) | no | no |
//! | `ConfiguredOnly` | yes | no |
//! | `ConnectedOnly` | no | yes |
//! | `Up` | yes | yes |
//!
//! Invalid event/state pairs are logged as warnings and ignored; they are not
//! fatal because interface monitors and configuration frontends can replay
//! events after restarts.

use std::time::Instant;

use thiserror::Error;

use crate::config::InterfaceConfig;
use crate::instance::actions::{EngineNotification, HandlerResult};
use crate::logging::{Facility, Logger};
use crate::protocol::adjacency::{self, Adjacency, AdjacencyState};
use crate::protocol::election;
use crate::protocol::{
    InterfaceInfo, TimerCancel, TimerRequest, TimerType, DR_ELECTION_HELLO_MULTIPLE, PSNP_JITTER,
};
use crate::{
    jittered, AddressFamily, LanId, Level, LevelUsage, LspId, Medium, Snpa, LEVEL_COUNT,
};
use crate::{log_debug, log_notice, log_warning};

/// Operational state of a circuit that exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Interface connected but routing not configured
    ConnectedOnly,
    /// Routing configured but interface not connected
    ConfiguredOnly,
    /// Configured, connected, and running the protocol
    Up,
}

/// Events driving the circuit state machine.
#[derive(Debug, Clone)]
pub enum CsmEvent {
    /// Routing administratively enabled on the interface
    Enable,
    /// Interface reported operationally connected
    InterfaceUp(InterfaceInfo),
    /// Routing administratively disabled
    Disable,
    /// Interface reported disconnected
    InterfaceDown,
}

impl CsmEvent {
    fn as_str(&self) -> &'static str {
        match self {
            CsmEvent::Enable => "enable",
            CsmEvent::InterfaceUp(_) => "interface-up",
            CsmEvent::Disable => "disable",
            CsmEvent::InterfaceDown => "interface-down",
        }
    }
}

/// Why an operational bring-up attempt was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CircuitUpError {
    #[error("no interface bound")]
    NoInterface,
    #[error("unsupported link layer: interface has no usable address")]
    UnsupportedLinkLayer,
    #[error("interface mtu is zero")]
    InvalidMtu,
}

/// Designated-router record for one broadcast circuit level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrState {
    /// Whether the local circuit currently acts as DR
    pub is_dr: bool,
    /// LAN id of the segment's elected designated router
    pub dis: Option<LanId>,
    /// A re-election was requested; drained on the hello transmission path
    pub election_pending: bool,
}

/// Per-level circuit state.
#[derive(Debug)]
pub struct CircuitLevelState {
    pub metric: u32,
    pub priority: u8,
    pub hello_interval: std::time::Duration,
    pub hello_multiplier: u16,
    pub csnp_interval: std::time::Duration,
    pub psnp_interval: std::time::Duration,
    /// Number of adjacencies currently in the UP state
    pub up_adjacency_count: usize,
    /// Broadcast neighbor collection (point-to-point uses the single slot)
    pub adjacencies: Vec<Adjacency>,
    /// SNPAs of current neighbors, advertised back in LAN hellos
    pub neighbor_snpas: Vec<Snpa>,
    pub dr: DrState,
}

impl CircuitLevelState {
    fn from_config(cfg: &crate::config::LevelConfig) -> Self {
        Self {
            metric: cfg.metric,
            priority: cfg.priority,
            hello_interval: cfg.hello_interval(),
            hello_multiplier: cfg.hello_multiplier,
            csnp_interval: cfg.csnp_interval(),
            psnp_interval: cfg.psnp_interval(),
            up_adjacency_count: 0,
            adjacencies: Vec::new(),
            neighbor_snpas: Vec::new(),
            dr: DrState::default(),
        }
    }

    /// Holding time advertised to neighbors at this level.
    pub fn holding_time(&self) -> std::time::Duration {
        self.hello_interval * self.hello_multiplier as u32
    }
}

/// A protocol-enabled interface.
#[derive(Debug)]
pub struct Circuit {
    pub interface: String,
    /// Local circuit number, used as the pseudonode id when acting as DR
    pub circuit_id: u8,
    pub state: CircuitState,
    pub medium: Medium,
    /// Levels this circuit participates in (already clamped to the area's)
    pub usage: LevelUsage,
    pub passive: bool,
    pub families: Vec<AddressFamily>,
    /// Bound interface facts; present in ConnectedOnly and Up
    pub iface: Option<InterfaceInfo>,
    pub levels: [CircuitLevelState; LEVEL_COUNT],
    /// Point-to-point neighbor slot
    pub p2p_neighbor: Option<Adjacency>,
    /// Locally queued, not yet flooded LSPs
    pub lsp_tx_queue: Vec<LspId>,
}

impl Circuit {
    /// Create a circuit from configuration. The initial state is chosen by
    /// the state machine event that caused creation.
    pub fn new(
        cfg: &InterfaceConfig,
        area_usage: LevelUsage,
        circuit_id: u8,
        state: CircuitState,
    ) -> Self {
        let usage = cfg
            .levels
            .and_then(|u| u.intersect(area_usage))
            .unwrap_or(area_usage);
        Self {
            interface: cfg.name.clone(),
            circuit_id,
            state,
            medium: cfg.medium,
            usage,
            passive: cfg.passive,
            families: cfg.families.clone(),
            iface: None,
            levels: [
                CircuitLevelState::from_config(&cfg.level1),
                CircuitLevelState::from_config(&cfg.level2),
            ],
            p2p_neighbor: None,
            lsp_tx_queue: Vec::new(),
        }
    }

    pub fn level(&self, level: Level) -> &CircuitLevelState {
        &self.levels[level.index()]
    }

    pub fn level_mut(&mut self, level: Level) -> &mut CircuitLevelState {
        &mut self.levels[level.index()]
    }

    /// Local link-layer address, or the zero sentinel when unbound.
    pub fn snpa(&self) -> Snpa {
        self.iface
            .as_ref()
            .and_then(|i| i.snpa)
            .unwrap_or(Snpa::ZERO)
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        self.usage.has(level)
    }

    pub fn has_family(&self, family: AddressFamily) -> bool {
        self.families.contains(&family)
    }

    /// Attempt to bring the circuit operationally up.
    ///
    /// Validation happens before any state is touched, so a failed attempt
    /// leaves the circuit exactly as it was and the caller can roll back the
    /// lifecycle transition.
    pub fn up(&mut self, now: Instant) -> Result<HandlerResult, CircuitUpError> {
        let mut result = HandlerResult::new();
        if self.state == CircuitState::Up {
            return Ok(result);
        }
        if self.passive || self.medium == Medium::Loopback {
            // Prefixes are advertised, the protocol machinery stays off
            return Ok(result);
        }

        let iface = self.iface.as_ref().ok_or(CircuitUpError::NoInterface)?;
        if iface.mtu == 0 {
            return Err(CircuitUpError::InvalidMtu);
        }
        if self.medium == Medium::Broadcast && iface.snpa.is_none() {
            return Err(CircuitUpError::UnsupportedLinkLayer);
        }

        match self.medium {
            Medium::Broadcast => {
                for level in self.usage.levels() {
                    // Commence hello transmission immediately; the hello
                    // handler reschedules with jitter from then on.
                    result.add_timer(TimerRequest {
                        timer_type: TimerType::LanHello {
                            interface: self.interface.clone(),
                            level,
                        },
                        fire_at: now,
                        replace_existing: true,
                    });
                    // DR election commences after two hello intervals
                    result.add_timer(TimerRequest {
                        timer_type: TimerType::DrElection {
                            interface: self.interface.clone(),
                            level,
                        },
                        fire_at: now
                            + self.level(level).hello_interval * DR_ELECTION_HELLO_MULTIPLE,
                        replace_existing: true,
                    });
                }
            }
            Medium::PointToPoint => {
                self.p2p_neighbor = None;
                result.add_timer(TimerRequest {
                    timer_type: TimerType::P2pHello {
                        interface: self.interface.clone(),
                    },
                    fire_at: now,
                    replace_existing: true,
                });
            }
            Medium::Loopback => unreachable!("handled above"),
        }

        for level in self.usage.levels() {
            result.add_timer(TimerRequest {
                timer_type: TimerType::Psnp {
                    interface: self.interface.clone(),
                    level,
                },
                fire_at: now + jittered(self.level(level).psnp_interval, PSNP_JITTER),
                replace_existing: true,
            });
        }

        self.lsp_tx_queue.clear();
        Ok(result)
    }

    /// Tear down operational state: adjacencies, DR role, timers, queues.
    pub fn down(
        &mut self,
        local_system_id: crate::SystemId,
        now: Instant,
        logger: &Logger,
    ) -> HandlerResult {
        let mut result = HandlerResult::new();
        if self.state != CircuitState::Up {
            return result;
        }

        // Resign DR first so adjacency teardown does not regenerate
        // pseudonode LSPs for a segment we are leaving.
        for level in Level::all() {
            if self.level(level).dr.is_dr {
                result.merge(election::resign(self, level, local_system_id, now, logger));
            }
        }

        // Take every adjacency to DOWN through the regular guarded
        // transition so dispatcher notifications fire.
        for level in Level::all() {
            let neighbors: Vec<_> = self
                .level(level)
                .adjacencies
                .iter()
                .map(|a| a.system_id)
                .collect();
            for system_id in neighbors {
                result.merge(adjacency::state_change(
                    self,
                    level,
                    system_id,
                    AdjacencyState::Down,
                    "circuit down",
                    now,
                    logger,
                ));
            }
        }
        if let Some((level, system_id)) = self.p2p_neighbor.as_ref().map(|n| (n.level, n.system_id))
        {
            result.merge(adjacency::state_change(
                self,
                level,
                system_id,
                AdjacencyState::Down,
                "circuit down",
                now,
                logger,
            ));
        }

        for state in self.levels.iter_mut() {
            state.neighbor_snpas.clear();
            state.up_adjacency_count = 0;
            state.dr = DrState::default();
        }
        self.lsp_tx_queue.clear();

        // Every timer owned by this circuit must die with it
        result.cancel(TimerCancel::Circuit {
            interface: self.interface.clone(),
        });

        // One gratuitous hello per level to speed neighbor convergence
        if !self.passive && self.medium != Medium::Loopback {
            for level in self.usage.levels() {
                match self.medium {
                    Medium::Broadcast => result.send(
                        crate::instance::actions::PduSend::LanHello {
                            interface: self.interface.clone(),
                            level,
                        },
                    ),
                    Medium::PointToPoint => {
                        result.send(crate::instance::actions::PduSend::P2pHello {
                            interface: self.interface.clone(),
                        });
                        break;
                    }
                    Medium::Loopback => {}
                }
            }
        }

        result
    }
}

/// Apply one lifecycle event to a circuit slot.
///
/// `slot` is `None` while no circuit object exists for the interface; the
/// state machine creates and destroys the object as connectivity and
/// configuration come and go.
pub fn csm_state_change(
    slot: &mut Option<Circuit>,
    interface: &str,
    event: CsmEvent,
    cfg: &InterfaceConfig,
    area_usage: LevelUsage,
    local_system_id: crate::SystemId,
    circuit_id: u8,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();
    let state = slot.as_ref().map(|c| c.state);

    match (state, event) {
        (None, CsmEvent::Enable) => {
            log_debug!(
                logger,
                Facility::Circuit,
                &format!("{interface}: created (configured)")
            );
            *slot = Some(Circuit::new(
                cfg,
                area_usage,
                circuit_id,
                CircuitState::ConfiguredOnly,
            ));
        }
        (None, CsmEvent::InterfaceUp(info)) => {
            log_debug!(
                logger,
                Facility::Circuit,
                &format!("{interface}: created (connected)")
            );
            let mut circuit =
                Circuit::new(cfg, area_usage, circuit_id, CircuitState::ConnectedOnly);
            circuit.iface = Some(info);
            *slot = Some(circuit);
        }
        (Some(CircuitState::ConnectedOnly), CsmEvent::Enable) => {
            let circuit = slot.as_mut().unwrap();
            match circuit.up(now) {
                Ok(up_result) => {
                    circuit.state = CircuitState::Up;
                    log_notice!(logger, Facility::Circuit, &format!("{interface}: up"));
                    result.merge(up_result);
                    result.notify(EngineNotification::CircuitStateChanged {
                        interface: interface.to_string(),
                        up: true,
                    });
                }
                Err(e) => {
                    // Rollback: stay connected-only, configuration withdrawn
                    log_warning!(
                        logger,
                        Facility::Circuit,
                        &format!("{interface}: bring-up failed: {e}")
                    );
                }
            }
        }
        (Some(CircuitState::ConnectedOnly), CsmEvent::InterfaceDown) => {
            log_debug!(
                logger,
                Facility::Circuit,
                &format!("{interface}: destroyed (disconnected)")
            );
            *slot = None;
        }
        (Some(CircuitState::ConfiguredOnly), CsmEvent::InterfaceUp(info)) => {
            let circuit = slot.as_mut().unwrap();
            circuit.iface = Some(info);
            match circuit.up(now) {
                Ok(up_result) => {
                    circuit.state = CircuitState::Up;
                    log_notice!(logger, Facility::Circuit, &format!("{interface}: up"));
                    result.merge(up_result);
                    result.notify(EngineNotification::CircuitStateChanged {
                        interface: interface.to_string(),
                        up: true,
                    });
                }
                Err(e) => {
                    // Rollback: unbind the interface again
                    circuit.iface = None;
                    log_warning!(
                        logger,
                        Facility::Circuit,
                        &format!("{interface}: bring-up failed: {e}")
                    );
                }
            }
        }
        (Some(CircuitState::ConfiguredOnly), CsmEvent::Disable) => {
            log_debug!(
                logger,
                Facility::Circuit,
                &format!("{interface}: destroyed (disabled)")
            );
            *slot = None;
        }
        (Some(CircuitState::Up), CsmEvent::Disable) => {
            let circuit = slot.as_mut().unwrap();
            result.merge(circuit.down(local_system_id, now, logger));
            circuit.state = CircuitState::ConnectedOnly;
            log_notice!(
                logger,
                Facility::Circuit,
                &format!("{interface}: down (disabled)")
            );
            result.notify(EngineNotification::CircuitStateChanged {
                interface: interface.to_string(),
                up: false,
            });
        }
        (Some(CircuitState::Up), CsmEvent::InterfaceDown) => {
            let circuit = slot.as_mut().unwrap();
            result.merge(circuit.down(local_system_id, now, logger));
            circuit.state = CircuitState::ConfiguredOnly;
            circuit.iface = None;
            log_notice!(
                logger,
                Facility::Circuit,
                &format!("{interface}: down (disconnected)")
            );
            result.notify(EngineNotification::CircuitStateChanged {
                interface: interface.to_string(),
                up: false,
            });
        }
        (state, event) => {
            let state_str = match state {
                None => "not-active",
                Some(CircuitState::ConnectedOnly) => "connected-only",
                Some(CircuitState::ConfiguredOnly) => "configured-only",
                Some(CircuitState::Up) => "up",
            };
            log_warning!(
                logger,
                Facility::Circuit,
                &format!(
                    "{interface}: invalid event '{}' in state '{state_str}'",
                    event.as_str()
                )
            );
        }
    }

    result
}
