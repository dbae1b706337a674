//! Test utilities shared by unit tests
//!
//! This module is only compiled when running tests.

#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use crate::behavior::{ClientIdentity, ClientSession, Role};
use crate::event_log::EventLog;
use crate::messaging::{ClientConnector, MemoryBroker, ServerEndpoint};

pub const TEST_MAX_MESSAGE_SIZE: usize = 2000;
pub const TEST_QUEUE_CAPACITY: usize = 1000;

/// Endpoint registered by `broker_with_queues`
pub fn test_endpoint() -> ServerEndpoint {
    ServerEndpoint::new("127.0.0.1", 34582)
}

/// Broker with one registered endpoint and the given queues
pub async fn broker_with_queues(queues: &[&str]) -> (Arc<MemoryBroker>, ServerEndpoint) {
    let broker = Arc::new(
        MemoryBroker::new(TEST_MAX_MESSAGE_SIZE).with_queue_capacity(TEST_QUEUE_CAPACITY),
    );
    let endpoint = test_endpoint();
    broker.register_endpoint(endpoint.clone());
    broker
        .create_queues(queues.iter().map(|q| q.to_string()))
        .await;
    (broker, endpoint)
}

/// Queue list in the shape behaviors take
pub fn queue_set(queues: &[&str]) -> Arc<[String]> {
    queues.iter().map(|q| q.to_string()).collect()
}

/// Connected session that counts events without storing them
pub async fn connected_session(
    broker: &Arc<MemoryBroker>,
    endpoint: &ServerEndpoint,
    role: Role,
    index: usize,
) -> ClientSession {
    let identity = ClientIdentity::new(role, index);
    let client = broker.connector().client(&identity.username);
    let log = EventLog::discard(identity.username.clone());
    let mut session = ClientSession::new(identity, client, log, Duration::ZERO);
    session
        .connect(endpoint)
        .await
        .expect("test session should connect");
    session
}
