// Structured logging for the routing engine.
//
// Protocol state machines log through a cloneable Logger handle; entries are
// buffered in a bounded ring and drained by a consumer task, or written
// straight to stderr as JSON when no consumer runs.

mod consumer;
mod entry;
mod facility;
mod logger;
#[macro_use]
mod macros;
mod severity;

// Public exports
pub use consumer::{AsyncConsumer, OutputSink, StderrTextSink, StdoutTextSink};
pub use entry::{KeyValue, LogEntry, MAX_KEY_VALUES};
pub use facility::Facility;
pub use logger::{EntrySink, LogRegistry, Logger, RingSink, StderrJsonSink};
pub use severity::Severity;
