// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for lsrd.
//!
//! JSON5 configuration format supporting:
//! - Instance-wide identity and level usage
//! - Per-interface circuit settings with per-level overrides
//! - Comments and trailing commas

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{
    DEFAULT_CIRCUIT_METRIC, DEFAULT_CSNP_INTERVAL, DEFAULT_HELLO_INTERVAL,
    DEFAULT_HELLO_MULTIPLIER, DEFAULT_PRIORITY, DEFAULT_PSNP_INTERVAL,
};
use crate::{AddressFamily, AreaAddress, LevelUsage, Medium, MetricStyle, SystemId};

/// Highest configurable designated-router priority.
pub const MAX_PRIORITY: u8 = 127;

/// Shortest allowed interval between SPF runs for one (level, family).
pub const MINIMUM_SPF_INTERVAL_SECS: u64 = 1;

fn default_level_usage() -> LevelUsage {
    LevelUsage::Level1And2
}

fn default_metric_style() -> MetricStyle {
    MetricStyle::Wide
}

fn default_spf_min_interval_secs() -> u64 {
    MINIMUM_SPF_INTERVAL_SECS
}

fn default_lsp_refresh_secs() -> u64 {
    crate::lsdb::DEFAULT_LSP_REFRESH_INTERVAL.as_secs()
}

fn default_families() -> Vec<AddressFamily> {
    vec![AddressFamily::Ipv4]
}

/// Startup/running configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// System identifier of this intermediate system
    pub system_id: SystemId,

    /// Name of the routing area this instance participates in
    pub area_tag: String,

    /// Area addresses advertised in hellos and the local LSP
    #[serde(default)]
    pub area_addresses: Vec<AreaAddress>,

    /// Levels this system routes at
    #[serde(default = "default_level_usage")]
    pub level_usage: LevelUsage,

    /// Metric encoding style (bounds link and path metrics)
    #[serde(default = "default_metric_style")]
    pub metric_style: MetricStyle,

    /// Minimum seconds between SPF runs for one (level, family)
    #[serde(default = "default_spf_min_interval_secs")]
    pub spf_min_interval_secs: u64,

    /// Seconds between refreshes of locally originated LSPs
    #[serde(default = "default_lsp_refresh_secs")]
    pub lsp_refresh_secs: u64,

    /// Circuits
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

/// Per-level circuit settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelConfig {
    /// Link metric advertised for this circuit
    #[serde(default = "LevelConfig::default_metric")]
    pub metric: u32,

    /// Designated-router priority (0-127)
    #[serde(default = "LevelConfig::default_priority")]
    pub priority: u8,

    /// Seconds between hello transmissions
    #[serde(default = "LevelConfig::default_hello_interval_secs")]
    pub hello_interval_secs: u64,

    /// Advertised holding time is `hello_interval * hello_multiplier`
    #[serde(default = "LevelConfig::default_hello_multiplier")]
    pub hello_multiplier: u16,

    /// Seconds between complete sequence-number PDUs (DR only)
    #[serde(default = "LevelConfig::default_csnp_interval_secs")]
    pub csnp_interval_secs: u64,

    /// Seconds between partial sequence-number PDUs
    #[serde(default = "LevelConfig::default_psnp_interval_secs")]
    pub psnp_interval_secs: u64,
}

impl LevelConfig {
    fn default_metric() -> u32 {
        DEFAULT_CIRCUIT_METRIC
    }
    fn default_priority() -> u8 {
        DEFAULT_PRIORITY
    }
    fn default_hello_interval_secs() -> u64 {
        DEFAULT_HELLO_INTERVAL.as_secs()
    }
    fn default_hello_multiplier() -> u16 {
        DEFAULT_HELLO_MULTIPLIER
    }
    fn default_csnp_interval_secs() -> u64 {
        DEFAULT_CSNP_INTERVAL.as_secs()
    }
    fn default_psnp_interval_secs() -> u64 {
        DEFAULT_PSNP_INTERVAL.as_secs()
    }

    pub fn hello_interval(&self) -> Duration {
        Duration::from_secs(self.hello_interval_secs)
    }

    pub fn csnp_interval(&self) -> Duration {
        Duration::from_secs(self.csnp_interval_secs)
    }

    pub fn psnp_interval(&self) -> Duration {
        Duration::from_secs(self.psnp_interval_secs)
    }

    /// Holding time advertised to neighbors.
    pub fn holding_time(&self) -> Duration {
        self.hello_interval() * self.hello_multiplier as u32
    }
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            metric: Self::default_metric(),
            priority: Self::default_priority(),
            hello_interval_secs: Self::default_hello_interval_secs(),
            hello_multiplier: Self::default_hello_multiplier(),
            csnp_interval_secs: Self::default_csnp_interval_secs(),
            psnp_interval_secs: Self::default_psnp_interval_secs(),
        }
    }
}

/// Circuit settings as stored in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceConfig {
    /// Network interface name
    pub name: String,

    /// Physical medium
    #[serde(default = "InterfaceConfig::default_medium")]
    pub medium: Medium,

    /// Levels this circuit participates in; defaults to the instance's
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub levels: Option<LevelUsage>,

    /// Advertise prefixes without running the protocol on the circuit
    #[serde(default)]
    pub passive: bool,

    /// Address families routed over this circuit
    #[serde(default = "default_families")]
    pub families: Vec<AddressFamily>,

    /// Level-1 settings
    #[serde(default)]
    pub level1: LevelConfig,

    /// Level-2 settings
    #[serde(default)]
    pub level2: LevelConfig,
}

impl InterfaceConfig {
    fn default_medium() -> Medium {
        Medium::Broadcast
    }

    /// Per-level settings.
    pub fn level(&self, level: crate::Level) -> &LevelConfig {
        match level {
            crate::Level::L1 => &self.level1,
            crate::Level::L2 => &self.level2,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("system id must not be all zeroes")]
    ZeroSystemId,

    #[error("area tag must not be empty")]
    EmptyAreaTag,

    #[error("duplicate interface '{0}'")]
    DuplicateInterface(String),

    #[error("interface '{name}': {reason}")]
    InvalidInterface { name: String, reason: String },

    #[error("interface '{name}' {level}: metric {metric} exceeds {style} style maximum {max}")]
    MetricOutOfRange {
        name: String,
        level: crate::Level,
        metric: u32,
        style: &'static str,
        max: u32,
    },
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to a pretty-printed string
    ///
    /// json5 has no pretty printer, so output goes through serde_json;
    /// json5 still parses it back (it is a JSON superset).
    pub fn to_json5(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn spf_min_interval(&self) -> Duration {
        Duration::from_secs(self.spf_min_interval_secs)
    }

    pub fn lsp_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.lsp_refresh_secs)
    }

    /// Find the settings for one interface
    pub fn interface(&self, name: &str) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_id == SystemId::default() {
            return Err(ConfigError::ZeroSystemId);
        }
        if self.area_tag.is_empty() {
            return Err(ConfigError::EmptyAreaTag);
        }

        let mut seen = std::collections::HashSet::new();
        for iface in &self.interfaces {
            if iface.name.is_empty() {
                return Err(ConfigError::InvalidInterface {
                    name: iface.name.clone(),
                    reason: "empty interface name".to_string(),
                });
            }
            if !seen.insert(iface.name.as_str()) {
                return Err(ConfigError::DuplicateInterface(iface.name.clone()));
            }
            if iface.medium == Medium::Loopback && !iface.passive {
                return Err(ConfigError::InvalidInterface {
                    name: iface.name.clone(),
                    reason: "loopback circuits must be passive".to_string(),
                });
            }
            if iface.families.is_empty() {
                return Err(ConfigError::InvalidInterface {
                    name: iface.name.clone(),
                    reason: "at least one address family required".to_string(),
                });
            }
            for level in crate::Level::all() {
                let lc = iface.level(level);
                if lc.priority > MAX_PRIORITY {
                    return Err(ConfigError::InvalidInterface {
                        name: iface.name.clone(),
                        reason: format!(
                            "{} priority {} exceeds maximum {}",
                            level, lc.priority, MAX_PRIORITY
                        ),
                    });
                }
                if lc.metric == 0 || lc.metric > self.metric_style.max_link_metric() {
                    return Err(ConfigError::MetricOutOfRange {
                        name: iface.name.clone(),
                        level,
                        metric: lc.metric,
                        style: match self.metric_style {
                            MetricStyle::Narrow => "narrow",
                            MetricStyle::Wide => "wide",
                        },
                        max: self.metric_style.max_link_metric(),
                    });
                }
                if lc.hello_interval_secs == 0 || lc.hello_multiplier < 2 {
                    return Err(ConfigError::InvalidInterface {
                        name: iface.name.clone(),
                        reason: format!("{level} hello timing out of range"),
                    });
                }
                if lc.csnp_interval_secs == 0 || lc.psnp_interval_secs == 0 {
                    return Err(ConfigError::InvalidInterface {
                        name: iface.name.clone(),
                        reason: format!("{level} sequence-number PDU interval must be non-zero"),
                    });
                }
            }
        }
        Ok(())
    }
}
