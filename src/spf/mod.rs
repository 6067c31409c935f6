// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Shortest-path-first engine
//!
//! Consumes the link-state database and adjacency state for one (level,
//! address family) and computes a shortest-path tree and the routes it
//! implies. One [`SpfTree`] exists per (level, family) and is reused across
//! runs: the vertex arena and list shells survive, their contents do not.
//!
//! ## Run states
//!
//! | State | Work |
//! |-------|------|
//! | INIT | clear tentative and finalized sets |
//! | PRELOAD | seed root, local prefixes, and direct neighbors |
//! | EXPAND | pop lowest (distance, type), finalize, walk its LSP |
//! | DONE | install routes, record run statistics |
//!
//! Scheduling is rate-limited: a request runs immediately only when the
//! configured minimum interval has passed since the previous run, otherwise a
//! timer is armed for the remaining delay and overlapping requests coalesce
//! on the pending flag.

pub mod run;
pub mod vertex;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{TimerRequest, TimerType};
use crate::{AddressFamily, Level};

pub use run::{SpfInputs, SpfRunResult};
pub use vertex::{
    nexthop_keep_order, trim_nexthops, SpfNexthop, Vertex, VertexArena, VertexId, VertexKey,
    VertexType, MAX_NEXTHOPS,
};

/// Outcome of an SPF scheduling request.
#[derive(Debug)]
pub enum SpfSchedule {
    /// The minimum interval has elapsed; run synchronously now
    RunNow,
    /// Run later; arm this timer for the remaining delay
    Deferred(TimerRequest),
    /// A run is already pending; the request coalesces into it
    AlreadyPending,
}

/// Shortest-path tree and run bookkeeping for one (level, address family).
#[derive(Debug, Default)]
pub struct SpfTree {
    pub(crate) arena: VertexArena,
    pub(crate) tent: Vec<VertexId>,
    pub(crate) tent_index: HashMap<VertexKey, VertexId>,
    pub(crate) paths: HashMap<VertexKey, VertexId>,
    /// Completed runs since creation
    pub runcount: u64,
    pub last_run_at: Option<Instant>,
    pub last_run_duration: Duration,
    /// A deferred run is scheduled
    pub pending: bool,
}

impl SpfTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a recomputation, honoring the minimum run interval.
    pub fn schedule(
        &mut self,
        level: Level,
        family: AddressFamily,
        min_interval: Duration,
        now: Instant,
    ) -> SpfSchedule {
        if self.pending {
            return SpfSchedule::AlreadyPending;
        }
        if let Some(last) = self.last_run_at {
            let due = last + min_interval;
            if now < due {
                self.pending = true;
                return SpfSchedule::Deferred(TimerRequest {
                    timer_type: TimerType::SpfDelay { level, family },
                    fire_at: due,
                    replace_existing: true,
                });
            }
        }
        SpfSchedule::RunNow
    }

    /// Finalized vertex for one identity, if the last run reached it.
    pub fn finalized(&self, key: &VertexKey) -> Option<&Vertex> {
        self.paths.get(key).map(|id| self.arena.vertex(*id))
    }

    /// Iterate the finalized set of the last run.
    pub fn finalized_iter(&self) -> impl Iterator<Item = &Vertex> {
        self.paths.values().map(|id| self.arena.vertex(*id))
    }

    /// Identities of the parents of a finalized vertex.
    pub fn parents_of(&self, key: &VertexKey) -> Vec<VertexKey> {
        self.paths
            .get(key)
            .map(|id| {
                self.arena
                    .vertex(*id)
                    .parents
                    .iter()
                    .map(|p| self.arena.vertex(*p).key)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop all per-run state, e.g. when the owning level is deconfigured.
    pub fn reset(&mut self) {
        self.arena.clear();
        self.tent.clear();
        self.tent_index.clear();
        self.paths.clear();
        self.runcount = 0;
        self.last_run_at = None;
        self.last_run_duration = Duration::ZERO;
        self.pending = false;
    }
}
