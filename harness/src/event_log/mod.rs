//! Per-client timestamped event streams
//!
//! Every simulated client appends one line per operation to its own stream:
//! `"<EVENT_KIND> <startEpochMillis> <endEpochMillis>"`. Streams are never
//! shared between clients and never rewritten.

mod event;
mod sink;

pub use event::{EventCounts, EventKind, EventParseError, LogEvent, now_millis};
pub use sink::{EventLog, LogTarget, MemoryLogStore, read_event_log};
