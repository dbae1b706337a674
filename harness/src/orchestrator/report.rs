//! Trace results

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::TracePhase;
use crate::behavior::Role;
use crate::config::RoleCounts;
use crate::event_log::{EventCounts, EventKind};
use crate::messaging::ServerEndpoint;

/// How a client's run loop ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClientStatus {
    Completed,
    Failed { reason: String },
    Panicked { reason: String },
}

impl ClientStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ClientStatus::Completed)
    }
}

/// Result for one client
#[derive(Debug, Clone, Serialize)]
pub struct ClientOutcome {
    pub username: String,
    pub role: Role,
    pub server: ServerEndpoint,
    #[serde(flatten)]
    pub status: ClientStatus,
    pub events: EventCounts,
}

/// When the orchestrator entered a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    pub phase: TracePhase,
    pub at_ms: u64,
}

/// Result of one iteration
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub run_id: Uuid,
    pub iteration: usize,
    pub population: RoleCounts,
    pub duration_ms: u64,
    pub phases: Vec<PhaseRecord>,
    pub clients: Vec<ClientOutcome>,
}

impl IterationReport {
    pub fn client(&self, username: &str) -> Option<&ClientOutcome> {
        self.clients.iter().find(|client| client.username == username)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ClientOutcome> {
        self.clients.iter().filter(|client| client.status.is_failure())
    }

    /// Event counts summed per role
    pub fn events_by_role(&self) -> BTreeMap<Role, EventCounts> {
        let mut by_role: BTreeMap<Role, EventCounts> = BTreeMap::new();
        for client in &self.clients {
            by_role.entry(client.role).or_default().merge(&client.events);
        }
        by_role
    }

    /// Event counts summed over every client
    pub fn total_events(&self) -> EventCounts {
        let mut total = EventCounts::default();
        for client in &self.clients {
            total.merge(&client.events);
        }
        total
    }

    pub fn phase_sequence(&self) -> Vec<TracePhase> {
        self.phases.iter().map(|record| record.phase).collect()
    }

    pub fn log_summary(&self) {
        let total = self.total_events();
        info!(
            "Iteration {} ({}) finished in {}ms: {} clients, {} events ({} sends, {} send errors, {} reads, {} misses)",
            self.iteration,
            self.run_id,
            self.duration_ms,
            self.clients.len(),
            total.total(),
            total.get(EventKind::Send),
            total.get(EventKind::ErrorSend),
            total.get(EventKind::Read),
            total.get(EventKind::Miss),
        );
        for client in self.failures() {
            match &client.status {
                ClientStatus::Failed { reason } | ClientStatus::Panicked { reason } => {
                    debug!("{} on {} ended early: {}", client.username, client.server, reason)
                }
                ClientStatus::Completed => {}
            }
        }
    }
}

/// Result of a whole trace
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceReport {
    pub iterations: Vec<IterationReport>,
}

impl TraceReport {
    pub fn failure_count(&self) -> usize {
        self.iterations
            .iter()
            .map(|iteration| iteration.failures().count())
            .sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn log_summary(&self) {
        let clients: usize = self.iterations.iter().map(|i| i.clients.len()).sum();
        info!(
            "Trace finished: {} iterations, {} client runs, {} failures",
            self.iterations.len(),
            clients,
            self.failure_count()
        );
    }
}
