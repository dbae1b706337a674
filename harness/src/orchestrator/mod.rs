//! Trace orchestration
//!
//! This module provides:
//! - `PopulationPlan` for turning a configuration into concrete clients
//! - `TraceOrchestrator` for running them through their lifecycle
//! - `IterationReset` hooks run between iterations
//! - `TraceReport` with per-client outcomes

mod population;
mod report;
mod reset;
mod trace;

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::behavior::BehaviorError;
use crate::config::ConfigError;

pub use population::{
    ClientPlan, PlanError, PopulationPlan, QueuePartition, assign_server, queue_names,
};
pub use report::{ClientOutcome, ClientStatus, IterationReport, PhaseRecord, TraceReport};
pub use reset::{BrokerReset, CommandReset, IterationReset, NoReset};
pub use trace::TraceOrchestrator;

/// Orchestrator lifecycle phases, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TracePhase {
    Building,
    Connected,
    Running,
    Stopping,
    Joined,
    Terminated,
}

impl TracePhase {
    pub const ALL: [TracePhase; 6] = [
        TracePhase::Building,
        TracePhase::Connected,
        TracePhase::Running,
        TracePhase::Stopping,
        TracePhase::Joined,
        TracePhase::Terminated,
    ];
}

impl fmt::Display for TracePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TracePhase::Building => "BUILDING",
            TracePhase::Connected => "CONNECTED",
            TracePhase::Running => "RUNNING",
            TracePhase::Stopping => "STOPPING",
            TracePhase::Joined => "JOINED",
            TracePhase::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Trace errors. All of them abort the trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Failed to prepare log destination: {0}")]
    LogDestination(#[source] io::Error),

    #[error("Failed to open event log for {username}: {source}")]
    Log {
        username: String,
        #[source]
        source: io::Error,
    },

    #[error("Trace setup failed: {0}")]
    Setup(#[source] BehaviorError),

    #[error("Iteration reset failed: {0}")]
    Reset(String),
}
