// Log consumer task - drains the shared ring and writes entries out

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::entry::LogEntry;
use super::logger::RingSink;

/// How often the consumer polls an idle ring.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Output destination for drained log entries
pub trait OutputSink: Send {
    /// Write a log entry to the sink
    fn write_entry(&mut self, entry: &LogEntry);

    /// Flush any buffered output
    fn flush(&mut self);
}

/// Standard output sink (writes rendered text lines to stdout)
pub struct StdoutTextSink {
    stdout: std::io::Stdout,
}

impl StdoutTextSink {
    pub fn new() -> Self {
        Self {
            stdout: std::io::stdout(),
        }
    }
}

impl Default for StdoutTextSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StdoutTextSink {
    fn write_entry(&mut self, entry: &LogEntry) {
        let _ = writeln!(self.stdout, "{}", entry.render());
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }
}

/// Standard error sink (writes rendered text lines to stderr)
pub struct StderrTextSink {
    stderr: std::io::Stderr,
}

impl StderrTextSink {
    pub fn new() -> Self {
        Self {
            stderr: std::io::stderr(),
        }
    }
}

impl Default for StderrTextSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StderrTextSink {
    fn write_entry(&mut self, entry: &LogEntry) {
        let _ = writeln!(self.stderr, "{}", entry.render());
    }

    fn flush(&mut self) {
        let _ = self.stderr.flush();
    }
}

/// Consumer task draining a [`RingSink`] on the tokio runtime.
pub struct AsyncConsumer {
    ring: Arc<RingSink>,
    sink: Box<dyn OutputSink>,
    running: Arc<AtomicBool>,
}

impl AsyncConsumer {
    /// Create a new async consumer with the given ring and sink
    pub fn new(ring: Arc<RingSink>, sink: Box<dyn OutputSink>) -> Self {
        Self {
            ring,
            sink,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a consumer that writes to stderr
    pub fn stderr(ring: Arc<RingSink>) -> Self {
        Self::new(ring, Box::new(StderrTextSink::new()))
    }

    /// Handle that stops the consumer loop from another task
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Drain everything currently buffered; returns the number written.
    pub fn drain_once(&mut self) -> usize {
        let mut count = 0;
        while let Some(entry) = self.ring.pop() {
            self.sink.write_entry(&entry);
            count += 1;
        }
        if count > 0 {
            self.sink.flush();
        }
        count
    }

    /// Run until stopped, draining the ring as entries arrive.
    pub async fn run(mut self) {
        while self.running.load(Ordering::Relaxed) {
            if self.drain_once() == 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
        // Final sweep so nothing buffered is lost on shutdown
        self.drain_once();
    }
}
