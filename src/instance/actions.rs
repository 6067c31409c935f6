// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Handler action types
//!
//! Protocol handlers return these instead of directly mutating database or
//! timer state. The decoupling keeps handlers pure functions that are easy to
//! test, and it prevents re-entrant recomputation: a handler can only request
//! work, never start it.

use crate::protocol::adjacency::AdjacencyState;
use crate::protocol::{TimerCancel, TimerRequest};
use crate::{AddressFamily, LanId, Level, LevelUsage};

/// Database and scheduling work a handler requests from the engine shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Schedule regeneration of the local LSPs for the given levels
    ScheduleLspRegen { usage: LevelUsage },
    /// Rebuild and install the local LSP for one level immediately
    RegenerateLocalLsp { level: Level },
    /// Generate (or refresh) the pseudonode LSP for a DIS circuit
    GeneratePseudonode { interface: String, level: Level },
    /// Purge a pseudonode LSP from the level's database
    PurgePseudonode { lan_id: LanId, level: Level },
    /// Schedule a shortest-path recomputation
    ScheduleSpf {
        level: Level,
        family: AddressFamily,
    },
}

/// State-change notifications consumed by the event dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotification {
    /// A circuit entered or left the UP state
    CircuitStateChanged { interface: String, up: bool },
    /// An adjacency changed protocol state
    AdjacencyStateChanged {
        interface: String,
        level: Level,
        system_id: crate::SystemId,
        new_state: AdjacencyState,
    },
    /// The local circuit commenced or resigned as designated router
    DisStatusChanged { interface: String, level: Level },
}

/// Transmit signals for the external hello/CSNP/PSNP transmitters
///
/// The engine decides *when* to transmit; serialization is external.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduSend {
    LanHello { interface: String, level: Level },
    P2pHello { interface: String },
    Csnp { interface: String, level: Level },
    Psnp { interface: String, level: Level },
}

/// Result returned by protocol event handlers
///
/// Contains all the side effects the handler wants performed:
/// - Timer requests and cancellations
/// - Database and scheduling actions
/// - Notifications for the event dispatcher
/// - Transmit signals
#[derive(Debug, Default)]
pub struct HandlerResult {
    /// Timers to schedule
    pub timers: Vec<TimerRequest>,
    /// Timers to cancel
    pub cancels: Vec<TimerCancel>,
    /// Database and scheduling actions to apply
    pub actions: Vec<EngineAction>,
    /// Notifications for the event dispatcher
    pub notifications: Vec<EngineNotification>,
    /// PDU transmissions to signal
    pub sends: Vec<PduSend>,
}

impl HandlerResult {
    /// Create a new empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a result with only timer requests
    pub fn with_timers(timers: Vec<TimerRequest>) -> Self {
        Self {
            timers,
            ..Default::default()
        }
    }

    /// Add a timer request
    pub fn add_timer(&mut self, timer: TimerRequest) {
        self.timers.push(timer);
    }

    /// Add multiple timer requests
    pub fn add_timers(&mut self, timers: Vec<TimerRequest>) {
        self.timers.extend(timers);
    }

    /// Add a timer cancellation
    pub fn cancel(&mut self, cancel: TimerCancel) {
        self.cancels.push(cancel);
    }

    /// Add an engine action
    pub fn add_action(&mut self, action: EngineAction) {
        self.actions.push(action);
    }

    /// Add a notification
    pub fn notify(&mut self, notification: EngineNotification) {
        self.notifications.push(notification);
    }

    /// Add a transmit signal
    pub fn send(&mut self, send: PduSend) {
        self.sends.push(send);
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: HandlerResult) {
        self.timers.extend(other.timers);
        self.cancels.extend(other.cancels);
        self.actions.extend(other.actions);
        self.notifications.extend(other.notifications);
        self.sends.extend(other.sends);
    }

    /// Check if the result requests nothing at all
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
            && self.cancels.is_empty()
            && self.actions.is_empty()
            && self.notifications.is_empty()
            && self.sends.is_empty()
    }
}

/// What remains for the engine shell after an area has fully processed a
/// [`HandlerResult`]: timer traffic for the timer manager and transmit
/// signals for the external transmitters.
#[derive(Debug, Default)]
pub struct EngineOutput {
    pub timers: Vec<TimerRequest>,
    pub cancels: Vec<TimerCancel>,
    pub sends: Vec<PduSend>,
}

impl EngineOutput {
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty() && self.cancels.is_empty() && self.sends.is_empty()
    }
}
