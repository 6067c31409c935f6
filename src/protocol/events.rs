// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Event dispatcher
//!
//! Reacts to circuit, adjacency, and type changes: coordinates per-level
//! timer sets, tears down or creates per-level databases, and schedules LSP
//! regeneration and shortest-path recomputation. Handlers here never start
//! that work themselves; they request it through [`HandlerResult`] actions,
//! which keeps a change that was itself triggered from inside a computation
//! from re-entering it.

use std::time::Instant;

use crate::instance::actions::{EngineAction, HandlerResult};
use crate::instance::area::Area;
use crate::logging::{Facility, Logger};
use crate::protocol::adjacency::{self, AdjacencyState};
use crate::protocol::circuit::DrState;
use crate::protocol::election;
use crate::protocol::{
    TimerCancel, TimerRequest, TimerType, DR_ELECTION_HELLO_MULTIPLE, PSNP_JITTER,
};
use crate::{jittered, Level, LevelUsage, Medium, SystemId};
use crate::{log_debug, log_warning};

/// A circuit entered or left the UP state: all reachability advertised over
/// it changed.
pub fn circuit_state_changed(
    area: &mut Area,
    interface: &str,
    up: bool,
    logger: &Logger,
) -> HandlerResult {
    area.circuit_state_changes += 1;
    log_debug!(
        logger,
        Facility::Event,
        &format!(
            "{interface}: circuit {} (change #{})",
            if up { "up" } else { "down" },
            area.circuit_state_changes
        )
    );
    let mut result = HandlerResult::new();
    result.add_action(EngineAction::ScheduleLspRegen { usage: area.usage });
    result
}

/// An adjacency transitioned: the topology implied by it changed.
/// A reference to a circuit that no longer exists is ignored.
pub fn adjacency_state_changed(
    area: &mut Area,
    interface: &str,
    level: Level,
    system_id: SystemId,
    new_state: AdjacencyState,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();
    if area.circuit(interface).is_none() {
        log_debug!(
            logger,
            Facility::Event,
            &format!("{interface}: adjacency change for unknown circuit ignored")
        );
        return result;
    }
    log_debug!(
        logger,
        Facility::Event,
        &format!("{interface} {level}: adjacency {system_id} now {new_state}")
    );
    result.add_action(EngineAction::ScheduleLspRegen { usage: area.usage });
    result
}

/// The local circuit commenced or resigned as DR on a segment.
pub fn dis_status_changed(
    area: &mut Area,
    interface: &str,
    level: Level,
    logger: &Logger,
) -> HandlerResult {
    log_debug!(
        logger,
        Facility::Event,
        &format!("{interface} {level}: DIS status changed")
    );
    let mut result = HandlerResult::new();
    result.add_action(EngineAction::ScheduleLspRegen { usage: area.usage });
    result
}

/// Area-wide level reconfiguration, e.g. level-1-only to level-1-and-2.
pub fn system_type_changed(
    area: &mut Area,
    new_usage: LevelUsage,
    system_id: SystemId,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();
    if area.usage == new_usage {
        log_debug!(
            logger,
            Facility::Event,
            &format!("system type already {new_usage}")
        );
        return result;
    }

    let old = area.usage;
    log_debug!(
        logger,
        Facility::Event,
        &format!("system type {old} -> {new_usage}")
    );
    area.usage = new_usage;

    for level in Level::all() {
        let had = old.has(level);
        let has = new_usage.has(level);
        if had && !has {
            // The level is gone: its database, trees, and tables go with it
            area.destroy_level(level);
            result.cancel(TimerCancel::Level { level });
        } else if !had && has {
            // Fresh, empty state for the gained level
            area.destroy_level(level);
        }
    }

    // Circuits whose effective level set is now inconsistent get narrowed
    let names: Vec<String> = {
        let mut names: Vec<String> = area.circuits.keys().cloned().collect();
        names.sort();
        names
    };
    for name in names {
        let usage = area.circuits[&name].usage;
        if usage.intersect(new_usage) != Some(usage) {
            result.merge(circuit_type_changed(
                area, &name, usage, system_id, now, logger,
            ));
        }
    }

    // Local LSPs for every level now active, then a full regeneration pass
    for level in new_usage.levels() {
        result.add_action(EngineAction::RegenerateLocalLsp { level });
    }
    result.add_action(EngineAction::ScheduleLspRegen { usage: new_usage });
    result
}

/// Per-circuit level reconfiguration.
pub fn circuit_type_changed(
    area: &mut Area,
    interface: &str,
    new_usage: LevelUsage,
    system_id: SystemId,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();
    let area_usage = area.usage;
    let Some(circuit) = area.circuits.get_mut(interface) else {
        log_warning!(
            logger,
            Facility::Event,
            &format!("{interface}: type change for unknown circuit")
        );
        return result;
    };
    let Some(new_eff) = new_usage.intersect(area_usage) else {
        log_warning!(
            logger,
            Facility::Event,
            &format!("{interface}: no level of {new_usage} is active in this area")
        );
        return result;
    };

    if circuit.state != crate::protocol::circuit::CircuitState::Up {
        // Not running: record for when the circuit comes up
        circuit.usage = new_eff;
        log_debug!(
            logger,
            Facility::Event,
            &format!("{interface}: circuit type recorded as {new_eff}")
        );
        return result;
    }

    let old = circuit.usage;
    if old == new_eff {
        return result;
    }
    log_debug!(
        logger,
        Facility::Event,
        &format!("{interface}: circuit type {old} -> {new_eff}")
    );

    for level in Level::all() {
        let had = old.has(level);
        let has = new_eff.has(level);
        if had && !has {
            // Level dropped: resign, tear down its adjacencies, stop its
            // timer set and neighbor list
            if circuit.level(level).dr.is_dr {
                result.merge(election::resign(circuit, level, system_id, now, logger));
            }
            let neighbors: Vec<SystemId> = circuit
                .level(level)
                .adjacencies
                .iter()
                .map(|a| a.system_id)
                .collect();
            for neighbor in neighbors {
                result.merge(adjacency::state_change(
                    circuit,
                    level,
                    neighbor,
                    AdjacencyState::Down,
                    "level disabled",
                    now,
                    logger,
                ));
            }
            let p2p = circuit
                .p2p_neighbor
                .as_ref()
                .filter(|a| a.level == level)
                .map(|a| a.system_id);
            if let Some(id) = p2p {
                result.merge(adjacency::state_change(
                    circuit,
                    level,
                    id,
                    AdjacencyState::Down,
                    "level disabled",
                    now,
                    logger,
                ));
            }
            circuit.level_mut(level).neighbor_snpas.clear();
            circuit.level_mut(level).dr = DrState::default();
            result.cancel(TimerCancel::CircuitLevel {
                interface: interface.to_string(),
                level,
            });
        } else if !had && has {
            // Level gained: start the symmetric timer set
            if circuit.medium == Medium::Broadcast {
                result.add_timer(TimerRequest {
                    timer_type: TimerType::LanHello {
                        interface: interface.to_string(),
                        level,
                    },
                    fire_at: now,
                    replace_existing: true,
                });
                result.add_timer(TimerRequest {
                    timer_type: TimerType::DrElection {
                        interface: interface.to_string(),
                        level,
                    },
                    fire_at: now
                        + circuit.level(level).hello_interval * DR_ELECTION_HELLO_MULTIPLE,
                    replace_existing: true,
                });
            }
            result.add_timer(TimerRequest {
                timer_type: TimerType::Psnp {
                    interface: interface.to_string(),
                    level,
                },
                fire_at: now + jittered(circuit.level(level).psnp_interval, PSNP_JITTER),
                replace_existing: true,
            });
        }
    }

    circuit.usage = new_eff;
    result.add_action(EngineAction::ScheduleLspRegen { usage: area_usage });
    result
}
