//! queuetrace harness library
//!
//! Load generation against queue-based messaging services: simulated client
//! roles, per-client event logs and the orchestrator that runs them. The
//! `queuetrace` binary and the integration tests drive everything from here.

pub mod behavior;
pub mod config;
pub mod event_log;
pub mod messaging;
pub mod orchestrator;
pub mod wait;

mod test_utils;

// Re-export commonly used types
pub use behavior::{ClientBehavior, ClientIdentity, Role};
pub use config::{ConfigError, RoleCounts, TraceConfig};
pub use event_log::{EventKind, LogEvent, LogTarget, MemoryLogStore};
pub use messaging::{ClientConnector, MemoryBroker, MessagingClient, ServerEndpoint};
pub use orchestrator::{PopulationPlan, TraceError, TraceOrchestrator, TraceReport};
pub use wait::WaitSpec;
