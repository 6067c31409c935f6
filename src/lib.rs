use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod instance;
#[macro_use]
pub mod logging;
pub mod lsdb;
pub mod protocol;
pub mod rib;
pub mod spf;

/// Length of a system identifier in octets.
pub const SYSTEM_ID_LEN: usize = 6;

/// Length of a subnetwork point-of-attachment (link-layer) address in octets.
pub const SNPA_LEN: usize = 6;

/// Number of routing levels.
pub const LEVEL_COUNT: usize = 2;

/// Unique identifier of an intermediate system within the routing domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemId(pub [u8; SYSTEM_ID_LEN]);

impl SystemId {
    pub const fn as_bytes(&self) -> &[u8; SYSTEM_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}.{:02x}{:02x}.{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for SystemId {
    type Err = String;

    /// Parse the dotted-hex form `xxxx.xxxx.xxxx`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != '.').collect();
        if hex.len() != SYSTEM_ID_LEN * 2 {
            return Err(format!("invalid system id '{s}'"));
        }
        let mut out = [0u8; SYSTEM_ID_LEN];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let chunk = std::str::from_utf8(chunk).map_err(|_| format!("invalid system id '{s}'"))?;
            out[i] = u8::from_str_radix(chunk, 16).map_err(|_| format!("invalid system id '{s}'"))?;
        }
        Ok(SystemId(out))
    }
}

impl Serialize for SystemId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SystemId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Subnetwork point of attachment: the link-layer address of a neighbor.
///
/// Ordering compares the address as a big-endian integer; designated-router
/// tie-breaks pick the numerically larger SNPA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snpa(pub [u8; SNPA_LEN]);

impl Snpa {
    /// Sentinel for an adjacency whose link-layer address is not yet known.
    pub const ZERO: Snpa = Snpa([0; SNPA_LEN]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0; SNPA_LEN]
    }
}

impl fmt::Display for Snpa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for Snpa {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; SNPA_LEN];
        let mut count = 0;
        for (i, part) in s.split(':').enumerate() {
            if i >= SNPA_LEN {
                return Err(format!("invalid snpa '{s}'"));
            }
            out[i] = u8::from_str_radix(part, 16).map_err(|_| format!("invalid snpa '{s}'"))?;
            count = i + 1;
        }
        if count != SNPA_LEN {
            return Err(format!("invalid snpa '{s}'"));
        }
        Ok(Snpa(out))
    }
}

impl Serialize for Snpa {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Snpa {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A system id qualified by a pseudonode number.
///
/// A zero pseudonode number names the system itself; a non-zero number names
/// the pseudonode a designated router advertises for one of its broadcast
/// segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LanId {
    pub system_id: SystemId,
    pub pseudonode: u8,
}

impl LanId {
    pub const fn new(system_id: SystemId, pseudonode: u8) -> Self {
        Self {
            system_id,
            pseudonode,
        }
    }

    /// LAN id for a plain (non-pseudonode) system.
    pub const fn system(system_id: SystemId) -> Self {
        Self::new(system_id, 0)
    }

    pub const fn is_pseudonode(&self) -> bool {
        self.pseudonode != 0
    }
}

impl fmt::Display for LanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02x}", self.system_id, self.pseudonode)
    }
}

/// Identifier of one link-state PDU fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LspId {
    pub lan_id: LanId,
    pub fragment: u8,
}

impl LspId {
    pub const fn new(lan_id: LanId, fragment: u8) -> Self {
        Self { lan_id, fragment }
    }

    /// Fragment zero for the given LAN id.
    pub const fn base(lan_id: LanId) -> Self {
        Self::new(lan_id, 0)
    }
}

impl fmt::Display for LspId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02x}", self.lan_id, self.fragment)
    }
}

/// A variable-length area address, as advertised in hello PDUs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AreaAddress(pub Vec<u8>);

impl fmt::Display for AreaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 && i % 2 == self.0.len() % 2 {
                write!(f, ".")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for AreaAddress {
    type Err = String;

    /// Parse the dotted-hex form, e.g. `49.0001`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != '.').collect();
        if hex.is_empty() || hex.len() % 2 != 0 || hex.len() > 26 {
            return Err(format!("invalid area address '{s}'"));
        }
        let mut out = Vec::with_capacity(hex.len() / 2);
        for chunk in hex.as_bytes().chunks(2) {
            let chunk =
                std::str::from_utf8(chunk).map_err(|_| format!("invalid area address '{s}'"))?;
            out.push(
                u8::from_str_radix(chunk, 16).map_err(|_| format!("invalid area address '{s}'"))?,
            );
        }
        Ok(AreaAddress(out))
    }
}

impl Serialize for AreaAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AreaAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Physical medium of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Medium {
    #[serde(rename = "broadcast")]
    Broadcast,
    #[serde(rename = "point-to-point")]
    PointToPoint,
    #[serde(rename = "loopback")]
    Loopback,
}

impl Medium {
    pub const fn as_str(self) -> &'static str {
        match self {
            Medium::Broadcast => "broadcast",
            Medium::PointToPoint => "point-to-point",
            Medium::Loopback => "loopback",
        }
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One of the two routing levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "level-1")]
    L1,
    #[serde(rename = "level-2")]
    L2,
}

impl Level {
    /// Index into per-level `[T; 2]` arrays.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Level::L1 => 0,
            Level::L2 => 1,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Level::L1 => "level-1",
            Level::L2 => "level-2",
        }
    }

    /// Both levels, in order.
    pub const fn all() -> [Level; LEVEL_COUNT] {
        [Level::L1, Level::L2]
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which levels a system or circuit participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelUsage {
    #[serde(rename = "level-1")]
    Level1,
    #[serde(rename = "level-2")]
    Level2,
    #[serde(rename = "level-1-2")]
    Level1And2,
}

impl LevelUsage {
    pub const fn has(self, level: Level) -> bool {
        match (self, level) {
            (LevelUsage::Level1, Level::L1) => true,
            (LevelUsage::Level2, Level::L2) => true,
            (LevelUsage::Level1And2, _) => true,
            _ => false,
        }
    }

    /// The levels enabled by this usage, in order.
    pub fn levels(self) -> impl Iterator<Item = Level> {
        Level::all().into_iter().filter(move |l| self.has(*l))
    }

    /// The usage shared by both operands, if any.
    pub fn intersect(self, other: LevelUsage) -> Option<LevelUsage> {
        let l1 = self.has(Level::L1) && other.has(Level::L1);
        let l2 = self.has(Level::L2) && other.has(Level::L2);
        match (l1, l2) {
            (true, true) => Some(LevelUsage::Level1And2),
            (true, false) => Some(LevelUsage::Level1),
            (false, true) => Some(LevelUsage::Level2),
            (false, false) => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LevelUsage::Level1 => "level-1",
            LevelUsage::Level2 => "level-2",
            LevelUsage::Level1And2 => "level-1-2",
        }
    }
}

impl fmt::Display for LevelUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Address family of a routed prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    #[serde(rename = "ipv4")]
    Ipv4,
    #[serde(rename = "ipv6")]
    Ipv6,
}

impl AddressFamily {
    pub const fn all() -> [AddressFamily; 2] {
        [AddressFamily::Ipv4, AddressFamily::Ipv6]
    }

    /// Index into per-family `[T; 2]` arrays.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            AddressFamily::Ipv4 => 0,
            AddressFamily::Ipv6 => 1,
        }
    }

    /// Family of a routed prefix.
    pub fn of(prefix: &IpNetwork) -> AddressFamily {
        match prefix {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of system a neighbor has declared itself to be.
///
/// The ordering is used by the equal-cost next-hop trimming comparator:
/// higher system types are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SystemType {
    Unknown = 0,
    EndSystem = 1,
    Level1IntermediateSystem = 2,
    Level2IntermediateSystem = 3,
}

impl SystemType {
    pub const fn as_str(self) -> &'static str {
        match self {
            SystemType::Unknown => "unknown",
            SystemType::EndSystem => "end-system",
            SystemType::Level1IntermediateSystem => "level-1-is",
            SystemType::Level2IntermediateSystem => "level-2-is",
        }
    }

    /// Whether this is an intermediate system usable at the given level.
    pub const fn is_intermediate_at(self, level: Level) -> bool {
        match (self, level) {
            (SystemType::Level1IntermediateSystem, Level::L1) => true,
            (SystemType::Level2IntermediateSystem, Level::L2) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metric encoding style, which bounds both link and path metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricStyle {
    /// 6-bit link metrics, path metrics up to 1023.
    #[serde(rename = "narrow")]
    Narrow,
    /// 24-bit link metrics, path metrics up to the wide ceiling.
    #[serde(rename = "wide")]
    Wide,
}

pub const MAX_NARROW_LINK_METRIC: u32 = 63;
pub const MAX_NARROW_PATH_METRIC: u32 = 1023;
pub const MAX_WIDE_LINK_METRIC: u32 = 0x00FF_FFFF;
pub const MAX_WIDE_PATH_METRIC: u32 = 0xFE00_0000;

impl MetricStyle {
    pub const fn max_link_metric(self) -> u32 {
        match self {
            MetricStyle::Narrow => MAX_NARROW_LINK_METRIC,
            MetricStyle::Wide => MAX_WIDE_LINK_METRIC,
        }
    }

    pub const fn max_path_metric(self) -> u32 {
        match self {
            MetricStyle::Narrow => MAX_NARROW_PATH_METRIC,
            MetricStyle::Wide => MAX_WIDE_PATH_METRIC,
        }
    }
}

/// Apply percentage jitter to a periodic interval.
///
/// Returns a duration uniformly drawn from `[interval - jitter_pct%,
/// interval]`, desynchronizing periodic transmissions between systems that
/// started at the same instant.
pub fn jittered(interval: Duration, jitter_pct: u32) -> Duration {
    if jitter_pct == 0 || interval.is_zero() {
        return interval;
    }
    let millis = interval.as_millis() as u64;
    let spread = millis * jitter_pct as u64 / 100;
    if spread == 0 {
        return interval;
    }
    let cut = rand::random_range(0..=spread);
    Duration::from_millis(millis - cut)
}
