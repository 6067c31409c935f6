// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which engine component generated the message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facility {
    /// Instance lifecycle, area management, event loop
    Instance = 0,
    /// Circuit state machine transitions
    Circuit = 1,
    /// Adjacency creation, state changes, hold-time expiry
    Adjacency = 2,
    /// Designated-router election
    Election = 3,
    /// Event dispatcher (regeneration and recomputation scheduling)
    Event = 4,
    /// Link-state database operations
    Lsdb = 5,
    /// Shortest-path-first computation
    Spf = 6,
    /// Route table installation
    Route = 7,
    /// Timer scheduling and expiry
    Timer = 8,

    /// Test harness and fixtures
    Test = 12,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    /// Get facility code as u8
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get facility name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Instance => "Instance",
            Facility::Circuit => "Circuit",
            Facility::Adjacency => "Adjacency",
            Facility::Election => "Election",
            Facility::Event => "Event",
            Facility::Lsdb => "Lsdb",
            Facility::Spf => "Spf",
            Facility::Route => "Route",
            Facility::Timer => "Timer",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }

    /// Create from u8 value (returns Unknown if unrecognized)
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Facility::Instance,
            1 => Facility::Circuit,
            2 => Facility::Adjacency,
            3 => Facility::Election,
            4 => Facility::Event,
            5 => Facility::Lsdb,
            6 => Facility::Spf,
            7 => Facility::Route,
            8 => Facility::Timer,
            12 => Facility::Test,
            _ => Facility::Unknown,
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facility_values() {
        assert_eq!(Facility::Instance.as_u8(), 0);
        assert_eq!(Facility::Spf.as_u8(), 6);
        assert_eq!(Facility::Unknown.as_u8(), 255);
    }

    #[test]
    fn test_facility_from_u8() {
        assert_eq!(Facility::from_u8(2), Facility::Adjacency);
        assert_eq!(Facility::from_u8(12), Facility::Test);
        assert_eq!(Facility::from_u8(99), Facility::Unknown);
    }

    #[test]
    fn test_facility_display() {
        assert_eq!(format!("{}", Facility::Election), "Election");
        assert_eq!(format!("{}", Facility::Spf), "Spf");
    }
}
