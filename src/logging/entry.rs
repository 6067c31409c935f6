// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log entry structure

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use super::{Facility, Severity};

/// Maximum number of key-value pairs carried by one entry.
pub const MAX_KEY_VALUES: usize = 4;

/// Global sequence counter; entries are ordered even when timestamps collide.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Key-value pair for structured logging
#[derive(Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

impl std::fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// One log record produced by the engine.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
    pub kvs: Vec<KeyValue>,
}

impl LogEntry {
    /// Create a new log entry stamped with the current time and sequence.
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            sequence: SEQUENCE.fetch_add(1, Ordering::Relaxed),
            severity,
            facility,
            message: message.to_string(),
            kvs: Vec::new(),
        }
    }

    /// Attach a key-value pair; pairs beyond [`MAX_KEY_VALUES`] are dropped.
    pub fn add_kv(&mut self, key: &str, value: &str) {
        if self.kvs.len() < MAX_KEY_VALUES {
            self.kvs.push(KeyValue::new(key, value));
        }
    }

    /// Render as a single text line: `[SEVERITY] [Facility] message k=v ...`
    pub fn render(&self) -> String {
        let mut line = format!(
            "[{}] [{}] {}",
            self.severity.as_str(),
            self.facility.as_str(),
            self.message
        );
        for kv in &self.kvs {
            line.push(' ');
            line.push_str(&format!("{kv:?}"));
        }
        line
    }

    /// Render as a JSON object for machine consumption.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "sequence": self.sequence,
            "level": self.severity.as_str(),
            "facility": self.facility.as_str(),
            "message": self.message,
        });
        if !self.kvs.is_empty() {
            let map: serde_json::Map<String, serde_json::Value> = self
                .kvs
                .iter()
                .map(|kv| (kv.key.clone(), serde_json::Value::String(kv.value.clone())))
                .collect();
            obj["fields"] = serde_json::Value::Object(map);
        }
        obj
    }
}
