// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Protocol state machines for the link-state routing engine
//!
//! This module contains the control-plane state machines that drive the
//! engine:
//!
//! - **Circuit state machine**: administrative/operational interface lifecycle
//! - **Adjacency manager**: per-circuit neighbor state and hold timers
//! - **DR elector**: designated-router election on broadcast segments
//! - **Event dispatcher**: reactions to state changes, regeneration scheduling
//!
//! ## Architecture
//!
//! State machines are pure and synchronous: each handler consumes a parsed
//! event plus the current time and returns a [`HandlerResult`]
//! (timer requests/cancellations, database actions, dispatcher notifications,
//! transmit signals) instead of performing side effects itself. The engine
//! shell in [`crate::instance`] applies those results, which keeps handlers
//! re-entrancy free and directly testable.
//!
//! ## Inputs
//!
//! | Event | Origin |
//! |-------|--------|
//! | Parsed hello / LSP | external PDU decoder |
//! | Interface up/down | platform interface monitor |
//! | Admin enable/disable, type changes | configuration frontend |
//! | Timer expiry | [`crate::instance::TimerManager`] |

pub mod adjacency;
pub mod circuit;
pub mod election;
pub mod events;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use ipnetwork::IpNetwork;

use crate::lsdb::ReceivedLsp;
use crate::{AddressFamily, AreaAddress, LanId, Level, LevelUsage, Snpa, SystemId};

// Default circuit timer values
pub const DEFAULT_HELLO_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_HELLO_MULTIPLIER: u16 = 10;
pub const DEFAULT_CSNP_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PSNP_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_PRIORITY: u8 = 64;
pub const DEFAULT_CIRCUIT_METRIC: u32 = 10;

// Jitter percentages applied to periodic transmissions
pub const HELLO_JITTER: u32 = 25;
pub const CSNP_JITTER: u32 = 10;
pub const PSNP_JITTER: u32 = 10;

/// A DR election is scheduled this many hello intervals after circuit up
/// or DR state change.
pub const DR_ELECTION_HELLO_MULTIPLE: u32 = 2;

/// Events consumed by the engine event loop
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// Parsed LAN hello delivered by the external decoder
    LanHelloReceived {
        interface: String,
        level: Level,
        hello: LanHello,
    },
    /// Parsed point-to-point hello delivered by the external decoder
    P2pHelloReceived {
        interface: String,
        hello: P2pHello,
    },
    /// Parsed link-state PDU delivered by the external decoder
    LspReceived {
        interface: String,
        level: Level,
        lsp: ReceivedLsp,
    },
    /// Platform reports the interface operationally connected
    InterfaceUp {
        interface: String,
        info: InterfaceInfo,
    },
    /// Platform reports the interface disconnected
    InterfaceDown { interface: String },
    /// Routing enabled on the interface by configuration
    AdminEnable { interface: String },
    /// Routing disabled on the interface by configuration
    AdminDisable { interface: String },
    /// Area-wide level reconfiguration
    SystemTypeChange { usage: LevelUsage },
    /// Per-circuit level reconfiguration
    CircuitTypeChange {
        interface: String,
        usage: LevelUsage,
    },
    /// A scheduled timer fired
    TimerExpired(TimerType),
}

/// Link-layer facts about a connected interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub ifindex: u32,
    pub mtu: u32,
    /// Link-layer address; absent on media without one
    pub snpa: Option<Snpa>,
    /// Prefixes configured on the interface
    pub prefixes: Vec<IpNetwork>,
}

/// Parsed LAN hello content (TLV decoding happens outside this engine)
#[derive(Debug, Clone)]
pub struct LanHello {
    pub source_id: SystemId,
    pub source_snpa: Snpa,
    /// Levels the neighbor participates in on this circuit
    pub circuit_type: LevelUsage,
    pub priority: u8,
    pub holding_time: Duration,
    /// The neighbor's view of the segment's designated router
    pub lan_id: LanId,
    pub area_addresses: Vec<AreaAddress>,
    /// SNPAs the neighbor has recently heard hellos from (two-way check)
    pub seen_snpas: Vec<Snpa>,
    pub ipv4_addresses: Vec<Ipv4Addr>,
    pub ipv6_addresses: Vec<Ipv6Addr>,
    /// Address families the neighbor negotiates
    pub families: Vec<AddressFamily>,
}

/// Parsed point-to-point hello content
#[derive(Debug, Clone)]
pub struct P2pHello {
    pub source_id: SystemId,
    pub circuit_type: LevelUsage,
    pub holding_time: Duration,
    pub area_addresses: Vec<AreaAddress>,
    pub ipv4_addresses: Vec<Ipv4Addr>,
    pub ipv6_addresses: Vec<Ipv6Addr>,
    pub families: Vec<AddressFamily>,
}

/// Types of timers used by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerType {
    /// Periodic LAN hello transmission (also drains pending DR elections)
    LanHello { interface: String, level: Level },
    /// Periodic point-to-point hello transmission
    P2pHello { interface: String },
    /// Periodic complete sequence-number PDU transmission (DR only)
    Csnp { interface: String, level: Level },
    /// Periodic partial sequence-number PDU transmission
    Psnp { interface: String, level: Level },
    /// Designated-router re-election request
    DrElection { interface: String, level: Level },
    /// Adjacency holding time expiry
    AdjacencyHold {
        interface: String,
        level: Level,
        system_id: SystemId,
    },
    /// Deferred local LSP regeneration
    LspRegenerate { level: Level },
    /// Periodic local LSP refresh
    LspRefresh { level: Level },
    /// Deferred shortest-path recomputation
    SpfDelay {
        level: Level,
        family: AddressFamily,
    },
}

impl TimerType {
    /// The circuit this timer belongs to, if any.
    pub fn interface(&self) -> Option<&str> {
        match self {
            TimerType::LanHello { interface, .. }
            | TimerType::P2pHello { interface }
            | TimerType::Csnp { interface, .. }
            | TimerType::Psnp { interface, .. }
            | TimerType::DrElection { interface, .. }
            | TimerType::AdjacencyHold { interface, .. } => Some(interface),
            TimerType::LspRegenerate { .. }
            | TimerType::LspRefresh { .. }
            | TimerType::SpfDelay { .. } => None,
        }
    }

    /// The level this timer belongs to, if any.
    pub fn level(&self) -> Option<Level> {
        match self {
            TimerType::LanHello { level, .. }
            | TimerType::Csnp { level, .. }
            | TimerType::Psnp { level, .. }
            | TimerType::DrElection { level, .. }
            | TimerType::AdjacencyHold { level, .. }
            | TimerType::LspRegenerate { level }
            | TimerType::LspRefresh { level }
            | TimerType::SpfDelay { level, .. } => Some(*level),
            TimerType::P2pHello { .. } => None,
        }
    }

    /// Whether a cancellation request covers this timer.
    pub fn matches(&self, cancel: &TimerCancel) -> bool {
        match cancel {
            TimerCancel::One(t) => self == t,
            TimerCancel::Circuit { interface } => self.interface() == Some(interface.as_str()),
            TimerCancel::CircuitLevel { interface, level } => {
                self.interface() == Some(interface.as_str()) && self.level() == Some(*level)
            }
            TimerCancel::Level { level } => {
                self.interface().is_none() && self.level() == Some(*level)
            }
        }
    }
}

/// Request to schedule a timer
#[derive(Debug, Clone)]
pub struct TimerRequest {
    /// Type of timer
    pub timer_type: TimerType,
    /// When the timer should fire
    pub fire_at: Instant,
    /// Whether this cancels any existing timer of the same type
    pub replace_existing: bool,
}

/// Request to cancel pending timers
///
/// Owners going away must cancel every timer they armed, so cancellation
/// supports whole-circuit and whole-level sweeps in addition to exact types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCancel {
    /// Cancel one exact timer
    One(TimerType),
    /// Cancel every timer belonging to a circuit
    Circuit { interface: String },
    /// Cancel every timer belonging to a circuit at one level
    CircuitLevel { interface: String, level: Level },
    /// Cancel area-level timers for one level
    Level { level: Level },
}
