// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger and LogRegistry

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use crossbeam_queue::ArrayQueue;

use super::entry::LogEntry;
use super::{Facility, Severity};

/// Destination a [`Logger`] hands finished entries to.
pub trait EntrySink: Send + Sync {
    fn write(&self, entry: LogEntry);
}

/// Bounded in-memory ring of log entries.
///
/// When full, the oldest entry is evicted so the producers never block; a
/// counter records how many entries were lost that way.
pub struct RingSink {
    queue: ArrayQueue<LogEntry>,
    dropped: AtomicU64,
}

impl RingSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Remove and return the oldest buffered entry.
    pub fn pop(&self) -> Option<LogEntry> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of entries evicted because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EntrySink for RingSink {
    fn write(&self, entry: LogEntry) {
        if self.queue.force_push(entry).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Sink that writes each entry straight to stderr as one JSON line.
pub struct StderrJsonSink;

impl EntrySink for StderrJsonSink {
    fn write(&self, entry: LogEntry) {
        eprintln!("{}", entry.to_json());
        // No flush() - let stderr buffer naturally
    }
}

/// Logger handle for writing log entries
///
/// This is a lightweight handle that can be cloned and passed around.
/// The sink and level filters are shared via Arc.
pub struct Logger {
    sink: Arc<dyn EntrySink>,
    /// Global minimum log level (default: Info)
    global_min_level: Arc<AtomicU8>,
    /// Per-facility minimum log levels
    facility_min_levels: Arc<RwLock<HashMap<Facility, Severity>>>,
}

impl Logger {
    fn new(
        sink: Arc<dyn EntrySink>,
        global_min_level: Arc<AtomicU8>,
        facility_min_levels: Arc<RwLock<HashMap<Facility, Severity>>>,
    ) -> Self {
        Self {
            sink,
            global_min_level,
            facility_min_levels,
        }
    }

    /// Standalone logger writing JSON directly to stderr, no filtering state
    /// shared with a registry. Useful for tools and tests.
    pub fn stderr_json() -> Self {
        Self::new(
            Arc::new(StderrJsonSink),
            Arc::new(AtomicU8::new(Severity::Info as u8)),
            Arc::new(RwLock::new(HashMap::new())),
        )
    }

    /// Standalone logger that discards everything below the given level into
    /// a ring the caller can inspect. Used by unit tests.
    pub fn ring(capacity: usize) -> (Self, Arc<RingSink>) {
        let ring = Arc::new(RingSink::new(capacity));
        let logger = Self::new(
            ring.clone(),
            Arc::new(AtomicU8::new(Severity::Debug as u8)),
            Arc::new(RwLock::new(HashMap::new())),
        );
        (logger, ring)
    }

    /// Check whether a message should be written given the configured levels.
    #[inline]
    fn should_log(&self, severity: Severity, facility: Facility) -> bool {
        // Facility-specific level overrides the global minimum
        let levels = self.facility_min_levels.read().unwrap();
        if let Some(&min_level) = levels.get(&facility) {
            return severity <= min_level;
        }
        drop(levels);

        let global_min = self.global_min_level.load(Ordering::Relaxed);
        (severity as u8) <= global_min
    }

    /// Write a log entry
    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if !self.should_log(severity, facility) {
            return;
        }
        self.sink.write(LogEntry::new(severity, facility, message));
    }

    /// Write a log entry with key-value pairs
    #[inline]
    pub fn log_kv(
        &self,
        severity: Severity,
        facility: Facility,
        message: &str,
        kvs: &[(&str, &str)],
    ) {
        if !self.should_log(severity, facility) {
            return;
        }
        let mut entry = LogEntry::new(severity, facility, message);
        for (key, value) in kvs {
            entry.add_kv(key, value);
        }
        self.sink.write(entry);
    }

    /// Log with critical severity
    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    /// Log with error severity
    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    /// Log with warning severity
    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    /// Log with notice severity
    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    /// Log with info severity
    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    /// Log with debug severity
    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }

    /// Set the global minimum log level
    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Set the minimum log level for a specific facility
    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        self.facility_min_levels
            .write()
            .unwrap()
            .insert(facility, level);
    }

    /// Clear the facility-specific log level (fall back to global)
    pub fn clear_facility_level(&self, facility: Facility) {
        self.facility_min_levels.write().unwrap().remove(&facility);
    }
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            global_min_level: Arc::clone(&self.global_min_level),
            facility_min_levels: Arc::clone(&self.facility_min_levels),
        }
    }
}

/// Owner of the shared sink and level filters; hands out [`Logger`] handles.
pub struct LogRegistry {
    sink: Arc<dyn EntrySink>,
    ring: Option<Arc<RingSink>>,
    /// Global minimum log level (default: Info = 6)
    global_min_level: Arc<AtomicU8>,
    /// Per-facility minimum log levels (overrides global)
    facility_min_levels: Arc<RwLock<HashMap<Facility, Severity>>>,
}

impl LogRegistry {
    /// Registry backed by a bounded ring; pair with an
    /// [`AsyncConsumer`](super::AsyncConsumer) to drain it.
    pub fn with_ring(capacity: usize) -> Self {
        let ring = Arc::new(RingSink::new(capacity));
        Self {
            sink: ring.clone(),
            ring: Some(ring),
            global_min_level: Arc::new(AtomicU8::new(Severity::Info as u8)),
            facility_min_levels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry writing JSON straight to stderr, no buffering.
    pub fn stderr_json() -> Self {
        Self {
            sink: Arc::new(StderrJsonSink),
            ring: None,
            global_min_level: Arc::new(AtomicU8::new(Severity::Info as u8)),
            facility_min_levels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get a logger handle sharing this registry's sink and filters.
    pub fn logger(&self) -> Logger {
        Logger::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.global_min_level),
            Arc::clone(&self.facility_min_levels),
        )
    }

    /// The backing ring, when this registry buffers entries.
    pub fn ring(&self) -> Option<Arc<RingSink>> {
        self.ring.clone()
    }

    /// Set the global minimum log level
    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Get the global minimum log level
    pub fn get_global_level(&self) -> Severity {
        let level = self.global_min_level.load(Ordering::Relaxed);
        Severity::from_u8(level).unwrap_or(Severity::Info)
    }

    /// Set the minimum log level for a specific facility
    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        self.facility_min_levels
            .write()
            .unwrap()
            .insert(facility, level);
    }

    /// Clear the facility-specific log level (fall back to global)
    pub fn clear_facility_level(&self, facility: Facility) {
        self.facility_min_levels.write().unwrap().remove(&facility);
    }

    /// Get the minimum log level for a specific facility
    pub fn get_facility_level(&self, facility: Facility) -> Severity {
        self.facility_min_levels
            .read()
            .unwrap()
            .get(&facility)
            .copied()
            .unwrap_or_else(|| self.get_global_level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_level_filtering() {
        let (logger, ring) = Logger::ring(16);
        logger.set_global_level(Severity::Warning);

        logger.error(Facility::Test, "error");
        logger.warning(Facility::Test, "warning");
        logger.notice(Facility::Test, "notice");
        logger.info(Facility::Test, "info");
        logger.debug(Facility::Test, "debug");

        let mut count = 0;
        while ring.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 2, "only Warning and above should pass");
    }

    #[test]
    fn test_facility_level_overrides_global() {
        let (logger, ring) = Logger::ring(16);
        logger.set_global_level(Severity::Error);
        logger.set_facility_level(Facility::Spf, Severity::Debug);

        logger.debug(Facility::Spf, "detailed spf trace");
        logger.info(Facility::Circuit, "suppressed by global level");

        let entry = ring.pop().expect("spf entry should pass");
        assert_eq!(entry.facility, Facility::Spf);
        assert!(ring.pop().is_none());

        logger.clear_facility_level(Facility::Spf);
        logger.debug(Facility::Spf, "now filtered");
        assert!(ring.pop().is_none());
    }

    #[test]
    fn test_ring_eviction_counts_drops() {
        let ring = RingSink::new(2);
        for i in 0..5 {
            ring.write(LogEntry::new(
                Severity::Info,
                Facility::Test,
                &format!("m{i}"),
            ));
        }
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.dropped(), 3);
        // Oldest entries were evicted
        assert_eq!(ring.pop().unwrap().message, "m3");
    }

    #[test]
    fn test_registry_hands_out_shared_filters() {
        let registry = LogRegistry::with_ring(8);
        let a = registry.logger();
        let b = registry.logger();

        registry.set_global_level(Severity::Error);
        a.info(Facility::Test, "filtered");
        b.error(Facility::Test, "kept");

        let ring = registry.ring().unwrap();
        assert_eq!(ring.len(), 1);
        assert_eq!(
            registry.get_facility_level(Facility::Test),
            Severity::Error
        );
    }

    #[test]
    fn test_log_kv() {
        let (logger, ring) = Logger::ring(4);
        logger.log_kv(
            Severity::Info,
            Facility::Adjacency,
            "adjacency up",
            &[("circuit", "eth0"), ("level", "level-1")],
        );
        let entry = ring.pop().unwrap();
        assert_eq!(entry.kvs.len(), 2);
        assert_eq!(entry.kvs[0].key, "circuit");
    }
}
