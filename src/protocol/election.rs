// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Designated-router election
//!
//! On broadcast segments one system represents the segment as a pseudonode
//! and floods its LSP. Election considers every adjacency in state UP or
//! INITIALIZING plus the local circuit; the highest (priority, SNPA) pair
//! wins, with the numerically larger SNPA breaking priority ties.
//!
//! Re-election is decoupled from its timer: the timer callback only raises a
//! per-circuit "election pending" flag, and the actual election runs from the
//! hello-transmission path. An election can therefore never re-enter itself
//! through the side effects it triggers.

use std::time::Instant;

use crate::instance::actions::{EngineAction, EngineNotification, HandlerResult};
use crate::logging::{Facility, Logger};
use crate::protocol::adjacency::{AdjacencyState, DisStatus};
use crate::protocol::circuit::Circuit;
use crate::protocol::{
    TimerCancel, TimerRequest, TimerType, CSNP_JITTER, DR_ELECTION_HELLO_MULTIPLE,
};
use crate::{jittered, LanId, Level, Medium, Snpa, SystemId};
use crate::{log_error, log_notice};

/// Run a designated-router election for one circuit level.
///
/// Idempotent: re-running with an unchanged adjacency set elects the same
/// system and produces no further commence/resign side effects.
pub fn elect(
    circuit: &mut Circuit,
    level: Level,
    local_system_id: SystemId,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();
    if circuit.medium != Medium::Broadcast || !circuit.is_enabled(level) {
        return result;
    }
    circuit.level_mut(level).dr.election_pending = false;

    // Highest (priority, SNPA) among adjacencies in UP or INITIALIZING
    let mut best: Option<(u8, Snpa, SystemId)> = None;
    for adj in circuit.level(level).adjacencies.iter().filter(|a| {
        matches!(
            a.state,
            AdjacencyState::Up | AdjacencyState::Initializing
        )
    }) {
        let key = (adj.priority, adj.snpa);
        match best {
            None => best = Some((adj.priority, adj.snpa, adj.system_id)),
            Some((bp, bs, bid)) => {
                if key > (bp, bs) {
                    best = Some((adj.priority, adj.snpa, adj.system_id));
                } else if key == (bp, bs) && adj.system_id != bid {
                    // Two neighbors claiming the same link-layer address is
                    // corrupt data, not a reason to abort the election
                    log_error!(
                        logger,
                        Facility::Election,
                        &format!(
                            "{} {level}: duplicate election key {}/{} for {} and {}",
                            circuit.interface, adj.priority, adj.snpa, bid, adj.system_id
                        )
                    );
                }
            }
        }
    }

    let prev_dis = circuit.level(level).dr.dis;
    match best {
        None => {
            // Empty segment: nobody to represent
            apply_dis_flags(circuit, level, None, now);
            circuit.level_mut(level).dr.dis = None;
            if circuit.level(level).dr.is_dr {
                result.merge(resign(circuit, level, local_system_id, now, logger));
            }
        }
        Some((priority, snpa, winner)) => {
            let local_key = (circuit.level(level).priority, circuit.snpa());
            if local_key > (priority, snpa) {
                // The local circuit outranks every neighbor
                apply_dis_flags(circuit, level, None, now);
                circuit.level_mut(level).dr.dis =
                    Some(LanId::new(local_system_id, circuit.circuit_id));
                if !circuit.level(level).dr.is_dr {
                    result.merge(commence(
                        circuit,
                        level,
                        local_system_id,
                        prev_dis,
                        now,
                        logger,
                    ));
                }
            } else {
                apply_dis_flags(circuit, level, Some(winner), now);
                let dis_lan = circuit
                    .level(level)
                    .adjacencies
                    .iter()
                    .find(|a| a.system_id == winner)
                    .and_then(|a| a.lan_id)
                    .unwrap_or(LanId::system(winner));
                circuit.level_mut(level).dr.dis = Some(dis_lan);
                if circuit.level(level).dr.is_dr {
                    result.merge(resign(circuit, level, local_system_id, now, logger));
                }
            }
        }
    }

    result
}

/// Update each candidate's current-DIS flag and record the transition in its
/// history ring when the flag changed since the previous election.
fn apply_dis_flags(circuit: &mut Circuit, level: Level, winner: Option<SystemId>, now: Instant) {
    for adj in circuit
        .level_mut(level)
        .adjacencies
        .iter_mut()
        .filter(|a| matches!(a.state, AdjacencyState::Up | AdjacencyState::Initializing))
    {
        let new = if Some(adj.system_id) == winner {
            DisStatus::IsDis
        } else {
            DisStatus::NotDis
        };
        if adj.dis[level.index()] != new {
            adj.dis[level.index()] = new;
            adj.dis_history[level.index()].push(new, now);
        }
    }
}

/// Take over as designated router for the segment.
pub fn commence(
    circuit: &mut Circuit,
    level: Level,
    local_system_id: SystemId,
    prev_dis: Option<LanId>,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();
    log_notice!(
        logger,
        Facility::Election,
        &format!("{} {level}: commencing as DIS", circuit.interface)
    );
    circuit.level_mut(level).dr.is_dr = true;

    // A pseudonode previously advertised by another system is stale now
    if let Some(prev) = prev_dis {
        if prev.system_id != local_system_id {
            result.add_action(EngineAction::PurgePseudonode {
                lan_id: prev,
                level,
            });
        }
    }
    result.add_action(EngineAction::GeneratePseudonode {
        interface: circuit.interface.clone(),
        level,
    });

    // The DIS synchronizes the segment with periodic CSNPs
    result.add_timer(TimerRequest {
        timer_type: TimerType::Csnp {
            interface: circuit.interface.clone(),
            level,
        },
        fire_at: now + jittered(circuit.level(level).csnp_interval, CSNP_JITTER),
        replace_existing: true,
    });
    result.add_timer(dr_election_restart(circuit, level, now));
    result.notify(EngineNotification::DisStatusChanged {
        interface: circuit.interface.clone(),
        level,
    });
    result
}

/// Stand down as designated router for the segment.
pub fn resign(
    circuit: &mut Circuit,
    level: Level,
    local_system_id: SystemId,
    now: Instant,
    logger: &Logger,
) -> HandlerResult {
    let mut result = HandlerResult::new();
    log_notice!(
        logger,
        Facility::Election,
        &format!("{} {level}: resigning as DIS", circuit.interface)
    );
    circuit.level_mut(level).dr.is_dr = false;

    result.add_action(EngineAction::PurgePseudonode {
        lan_id: LanId::new(local_system_id, circuit.circuit_id),
        level,
    });
    // PSNP-based synchronization resumes; periodic CSNPs stop
    result.cancel(TimerCancel::One(TimerType::Csnp {
        interface: circuit.interface.clone(),
        level,
    }));
    result.add_timer(dr_election_restart(circuit, level, now));
    result.notify(EngineNotification::DisStatusChanged {
        interface: circuit.interface.clone(),
        level,
    });
    result
}

fn dr_election_restart(circuit: &Circuit, level: Level, now: Instant) -> TimerRequest {
    TimerRequest {
        timer_type: TimerType::DrElection {
            interface: circuit.interface.clone(),
            level,
        },
        fire_at: now + circuit.level(level).hello_interval * DR_ELECTION_HELLO_MULTIPLE,
        replace_existing: true,
    }
}
