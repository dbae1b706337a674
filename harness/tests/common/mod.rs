//! Common Test Utilities for Integration Tests
//!
//! Shared helpers that run whole traces against the in-process broker.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use queuetrace_harness::config::{RoleCounts, TraceConfig};
use queuetrace_harness::event_log::{EventKind, LogTarget, MemoryLogStore};
use queuetrace_harness::messaging::{MemoryBroker, ServerEndpoint};
use queuetrace_harness::orchestrator::{TraceError, TraceOrchestrator, TraceReport};
use queuetrace_harness::wait::WaitSpec;

pub const BASE_PORT: u16 = 34582;

/// Endpoint of server `i` in test configurations
pub fn server(i: usize) -> ServerEndpoint {
    ServerEndpoint::new("127.0.0.1", BASE_PORT + i as u16)
}

/// Trace of one iteration over `servers` servers and ten queues
pub fn trace_config(servers: usize, counts: RoleCounts, running_time: Duration) -> TraceConfig {
    let mut config = TraceConfig::default();
    config.system.queue_count = 10;
    config.system.servers = (0..servers).map(server).collect();
    config.trace.running_time = running_time;
    config.trace.populations = vec![counts];
    config.trace.wait = Some(WaitSpec::Uniform {
        min: Duration::from_millis(1),
        max: Duration::from_millis(5),
    });
    config
}

/// Broker serving every configured server with every configured queue
pub async fn broker_for(config: &TraceConfig) -> Arc<MemoryBroker> {
    let mut broker = MemoryBroker::new(config.system.max_message_size)
        .with_latency(config.system.simulated_latency);
    if let Some(capacity) = config.system.queue_capacity {
        broker = broker.with_queue_capacity(capacity);
    }
    for endpoint in &config.system.servers {
        broker.register_endpoint(endpoint.clone());
    }
    let broker = Arc::new(broker);
    broker.create_queues(config.queue_names()).await;
    broker
}

/// Completed trace with its in-memory event streams
pub struct TraceRun {
    pub broker: Arc<MemoryBroker>,
    pub store: MemoryLogStore,
    pub result: Result<TraceReport, TraceError>,
}

/// Run a trace with event streams kept in memory
pub async fn run_in_memory(config: TraceConfig) -> TraceRun {
    let broker = broker_for(&config).await;
    run_on(config, broker).await
}

/// Run a trace against an existing broker
pub async fn run_on(config: TraceConfig, broker: Arc<MemoryBroker>) -> TraceRun {
    let store = MemoryLogStore::new();
    let result = TraceOrchestrator::new(config, Arc::new(broker.connector()))
        .with_log_target(LogTarget::Memory(store.clone()))
        .run()
        .await;
    TraceRun {
        broker,
        store,
        result,
    }
}

/// Event kinds of one client, in order
pub fn kinds(store: &MemoryLogStore, username: &str) -> Vec<EventKind> {
    store.events(username).iter().map(|event| event.kind).collect()
}

/// Number of events of one kind across every client
pub fn count_kind(store: &MemoryLogStore, kind: EventKind) -> usize {
    store
        .all_events()
        .iter()
        .filter(|(_, event)| event.kind == kind)
        .count()
}

/// Every stream opens with CONNECT and closes with DISCONNECT, once each
pub fn assert_bracketed(store: &MemoryLogStore, username: &str) {
    let kinds = kinds(store, username);
    assert_eq!(kinds.first(), Some(&EventKind::Connect), "{username}: {kinds:?}");
    assert_eq!(kinds.last(), Some(&EventKind::Disconnect), "{username}: {kinds:?}");
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::Connect).count(),
        1,
        "{username}"
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::Disconnect).count(),
        1,
        "{username}"
    );
}

/// Kinds outside `allowed`, ignoring CONNECT/DISCONNECT
pub fn unexpected_kinds(
    store: &MemoryLogStore,
    username: &str,
    allowed: &[EventKind],
) -> Vec<EventKind> {
    kinds(store, username)
        .into_iter()
        .filter(|k| !matches!(k, EventKind::Connect | EventKind::Disconnect))
        .filter(|k| !allowed.contains(k))
        .collect()
}
