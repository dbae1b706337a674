//! In-process messaging service
//!
//! `MemoryBroker` keeps every queue in memory and serves `MemoryClient`
//! sessions with the same visibility rules as the remote service:
//! - a client only sees messages that are unaddressed or addressed to it
//! - retrieval returns the highest priority message, newest first among equals
//! - popping a message removes it from every queue it was sent to
//!
//! Endpoints must be registered and queues created before clients use them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::service::{ClientConnector, MessagingClient};
use super::types::{
    MAX_PRIORITY, MIN_PRIORITY, Message, MessagingError, OutgoingMessage, ServerEndpoint,
};

/// Position of a message inside a queue: (priority, id). Larger sorts first.
type SlotKey = (u8, u64);

/// Per-queue index of the messages it holds
#[derive(Default)]
struct QueueSlots {
    /// Messages without an addressed receiver
    open: BTreeSet<SlotKey>,
    /// Messages addressed to a specific receiver, by receiver
    addressed: HashMap<String, BTreeSet<SlotKey>>,
    depth: usize,
}

impl QueueSlots {
    fn top_for(&self, username: &str) -> Option<SlotKey> {
        let open = self.open.last().copied();
        let mine = self
            .addressed
            .get(username)
            .and_then(|slots| slots.last().copied());
        open.max(mine)
    }

    fn has_addressed_to(&self, username: &str) -> bool {
        self.addressed
            .get(username)
            .is_some_and(|slots| !slots.is_empty())
    }

    fn insert(&mut self, key: SlotKey, receiver: Option<&str>) {
        let inserted = match receiver {
            Some(receiver) => self
                .addressed
                .entry(receiver.to_string())
                .or_default()
                .insert(key),
            None => self.open.insert(key),
        };
        if inserted {
            self.depth += 1;
        }
    }

    fn remove(&mut self, key: SlotKey, receiver: Option<&str>) {
        let removed = match receiver {
            Some(receiver) => {
                let Some(slots) = self.addressed.get_mut(receiver) else {
                    return;
                };
                let removed = slots.remove(&key);
                if slots.is_empty() {
                    self.addressed.remove(receiver);
                }
                removed
            }
            None => self.open.remove(&key),
        };
        if removed {
            self.depth -= 1;
        }
    }

    fn clear(&mut self) {
        self.open.clear();
        self.addressed.clear();
        self.depth = 0;
    }
}

struct StoredMessage {
    sender: String,
    receiver: Option<String>,
    context: i32,
    priority: u8,
    content: Arc<str>,
    queues: Vec<String>,
}

impl StoredMessage {
    fn to_message(&self, id: u64, queue: &str) -> Message {
        Message {
            id,
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            queue: queue.to_string(),
            context: self.context,
            priority: self.priority,
            content: self.content.to_string(),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueSlots>,
    messages: HashMap<u64, StoredMessage>,
}

/// In-memory queue service shared by every `MemoryClient`
pub struct MemoryBroker {
    endpoints: DashSet<ServerEndpoint>,
    online: DashMap<String, ServerEndpoint>,
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
    max_message_size: usize,
    queue_capacity: Option<usize>,
    latency: Duration,
}

impl MemoryBroker {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            endpoints: DashSet::new(),
            online: DashMap::new(),
            state: Mutex::new(BrokerState::default()),
            next_id: AtomicU64::new(1),
            max_message_size,
            queue_capacity: None,
            latency: Duration::ZERO,
        }
    }

    /// Simulate a network round trip of `latency` on every client call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reject sends to any queue already holding `capacity` messages
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Accept connections for the given endpoint
    pub fn register_endpoint(&self, endpoint: ServerEndpoint) {
        debug!("Registered endpoint {}", endpoint);
        self.endpoints.insert(endpoint);
    }

    /// Create queues that do not exist yet
    pub async fn create_queues<I>(&self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state.lock().await;
        let mut created = 0usize;
        for name in names {
            if let std::collections::hash_map::Entry::Vacant(entry) = state.queues.entry(name) {
                entry.insert(QueueSlots::default());
                created += 1;
            }
        }
        debug!("Created {} queues", created);
    }

    /// Drop every stored message, keeping the queues
    pub async fn purge(&self) {
        let mut state = self.state.lock().await;
        let dropped = state.messages.len();
        state.messages.clear();
        for slots in state.queues.values_mut() {
            slots.clear();
        }
        info!("Purged {} messages from the in-process broker", dropped);
    }

    /// Number of messages held by a queue, `None` if it does not exist
    pub async fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|slots| slots.depth)
    }

    /// Number of distinct messages held across all queues
    pub async fn message_count(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    /// Every message in a queue regardless of receiver, top first
    pub async fn snapshot(&self, queue: &str) -> Vec<Message> {
        let state = self.state.lock().await;
        let Some(slots) = state.queues.get(queue) else {
            return Vec::new();
        };

        let mut keys: Vec<SlotKey> = slots
            .open
            .iter()
            .chain(slots.addressed.values().flatten())
            .copied()
            .collect();
        keys.sort_unstable_by(|a, b| b.cmp(a));

        keys.into_iter()
            .filter_map(|(_, id)| {
                state
                    .messages
                    .get(&id)
                    .map(|stored| stored.to_message(id, queue))
            })
            .collect()
    }

    /// Number of clients currently logged in
    pub fn online_clients(&self) -> usize {
        self.online.len()
    }

    /// Connector handing out sessions against this broker
    pub fn connector(self: &Arc<Self>) -> MemoryConnector {
        MemoryConnector {
            broker: Arc::clone(self),
        }
    }

    fn login(&self, username: &str, endpoint: &ServerEndpoint) -> Result<(), MessagingError> {
        if !self.endpoints.contains(endpoint) {
            return Err(MessagingError::ConnectionRefused(endpoint.clone()));
        }

        match self.online.entry(username.to_string()) {
            Entry::Occupied(_) => Err(MessagingError::AlreadyOnline(username.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(endpoint.clone());
                Ok(())
            }
        }
    }

    fn logout(&self, username: &str) {
        self.online.remove(username);
    }

    async fn store(&self, sender: &str, message: &OutgoingMessage) -> Result<u64, MessagingError> {
        if message.queues.is_empty() {
            return Err(MessagingError::NoTargetQueue);
        }
        if message.content.len() > self.max_message_size {
            return Err(MessagingError::MessageTooLarge {
                size: message.content.len(),
                limit: self.max_message_size,
            });
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&message.priority) {
            return Err(MessagingError::InvalidPriority(message.priority));
        }

        let mut targets = message.queues.clone();
        targets.sort_unstable();
        targets.dedup();

        let mut state = self.state.lock().await;
        for queue in &targets {
            let slots = state
                .queues
                .get(queue)
                .ok_or_else(|| MessagingError::QueueNotFound(queue.clone()))?;
            if self
                .queue_capacity
                .is_some_and(|capacity| slots.depth >= capacity)
            {
                return Err(MessagingError::QueueFull(queue.clone()));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (message.priority, id);
        for queue in &targets {
            if let Some(slots) = state.queues.get_mut(queue) {
                slots.insert(key, message.receiver.as_deref());
            }
        }
        state.messages.insert(
            id,
            StoredMessage {
                sender: sender.to_string(),
                receiver: message.receiver.clone(),
                context: message.context,
                priority: message.priority,
                content: Arc::from(message.content.as_str()),
                queues: targets,
            },
        );

        Ok(id)
    }

    async fn retrieve(
        &self,
        username: &str,
        queue: &str,
        pop: bool,
    ) -> Result<Option<Message>, MessagingError> {
        let mut state = self.state.lock().await;

        let top = state
            .queues
            .get(queue)
            .ok_or_else(|| MessagingError::QueueNotFound(queue.to_string()))?
            .top_for(username);
        let Some(key @ (_, id)) = top else {
            return Ok(None);
        };

        if !pop {
            return Ok(state
                .messages
                .get(&id)
                .map(|stored| stored.to_message(id, queue)));
        }

        let Some(stored) = state.messages.remove(&id) else {
            return Ok(None);
        };
        for target in &stored.queues {
            if let Some(slots) = state.queues.get_mut(target) {
                slots.remove(key, stored.receiver.as_deref());
            }
        }

        Ok(Some(stored.to_message(id, queue)))
    }

    async fn waiting_queues(&self, username: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut queues: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, slots)| slots.has_addressed_to(username))
            .map(|(name, _)| name.clone())
            .collect();
        queues.sort_unstable();
        queues
    }
}

/// Hands out `MemoryClient` sessions
#[derive(Clone)]
pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
}

impl ClientConnector for MemoryConnector {
    fn client(&self, username: &str) -> Box<dyn MessagingClient> {
        Box::new(MemoryClient::new(Arc::clone(&self.broker), username))
    }
}

/// One client session against a `MemoryBroker`
pub struct MemoryClient {
    broker: Arc<MemoryBroker>,
    username: String,
    endpoint: Option<ServerEndpoint>,
}

impl MemoryClient {
    pub fn new(broker: Arc<MemoryBroker>, username: impl Into<String>) -> Self {
        Self {
            broker,
            username: username.into(),
            endpoint: None,
        }
    }

    async fn round_trip(&self) {
        if !self.broker.latency.is_zero() {
            tokio::time::sleep(self.broker.latency).await;
        }
    }

    fn ensure_connected(&self) -> Result<(), MessagingError> {
        if self.endpoint.is_some() {
            Ok(())
        } else {
            Err(MessagingError::NotConnected)
        }
    }
}

#[async_trait]
impl MessagingClient for MemoryClient {
    fn username(&self) -> &str {
        &self.username
    }

    async fn connect(&mut self, endpoint: &ServerEndpoint) -> Result<(), MessagingError> {
        self.round_trip().await;
        if self.endpoint.take().is_some() {
            self.broker.logout(&self.username);
        }
        self.broker.login(&self.username, endpoint)?;
        self.endpoint = Some(endpoint.clone());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MessagingError> {
        self.round_trip().await;
        self.ensure_connected()?;
        self.broker.logout(&self.username);
        self.endpoint = None;
        Ok(())
    }

    async fn send_message(&mut self, message: &OutgoingMessage) -> Result<(), MessagingError> {
        self.round_trip().await;
        self.ensure_connected()?;
        self.broker.store(&self.username, message).await.map(|_| ())
    }

    async fn view_message_from_queue(
        &mut self,
        queue: &str,
        pop: bool,
    ) -> Result<Option<Message>, MessagingError> {
        self.round_trip().await;
        self.ensure_connected()?;
        self.broker.retrieve(&self.username, queue, pop).await
    }

    async fn get_waiting_queues(&mut self) -> Result<Vec<String>, MessagingError> {
        self.round_trip().await;
        self.ensure_connected()?;
        Ok(self.broker.waiting_queues(&self.username).await)
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        if self.endpoint.is_some() {
            self.broker.logout(&self.username);
        }
    }
}
