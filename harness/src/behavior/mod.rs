//! Simulated client behaviors
//!
//! Each role drives the messaging service with its own interaction pattern:
//! - "Alice" broadcasts a fixed payload to randomly sampled queues
//! - "Bob" pops from a random queue
//! - "Larry" relays a counter message around a ring of peers
//! - "Tola"/"Maruja" exchange requests and acknowledgements in pairs
//! - "Rick"/"Carl" consume from and produce to one shared queue
//!
//! All behaviors share the lifecycle connect → run → signal stop → disconnect.

mod broadcast;
mod pair;
mod payload;
mod reader;
mod ring;
mod session;
mod shared_queue;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::messaging::{MessagingError, ServerEndpoint};

pub use broadcast::BroadcastSender;
pub use pair::{ACKNOWLEDGEMENT, RequestSource, RequestTarget};
pub use payload::PayloadSource;
pub use reader::SimpleReader;
pub use ring::{RingParseError, RingRelay, max_counter_line_len, relay_content};
pub use session::ClientSession;
pub use shared_queue::{PassiveConsumer, PersistentProducer};

/// Simulated client roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Role {
    Alice,
    Bob,
    Larry,
    Tola,
    Maruja,
    Rick,
    Carl,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Alice,
        Role::Bob,
        Role::Larry,
        Role::Tola,
        Role::Maruja,
        Role::Rick,
        Role::Carl,
    ];

    /// Username prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            Role::Alice => "Alice",
            Role::Bob => "Bob",
            Role::Larry => "Larry",
            Role::Tola => "Tola",
            Role::Maruja => "Maruja",
            Role::Rick => "Rick",
            Role::Carl => "Carl",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Alice => "broadcast sender",
            Role::Bob => "simple reader",
            Role::Larry => "ring relay",
            Role::Tola => "request source",
            Role::Maruja => "request target",
            Role::Rick => "passive consumer",
            Role::Carl => "persistent producer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Who a simulated client is. Usernames are `"<RolePrefix><index>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClientIdentity {
    pub role: Role,
    pub index: usize,
    pub username: String,
}

impl ClientIdentity {
    pub fn new(role: Role, index: usize) -> Self {
        Self {
            role,
            index,
            username: format!("{}{}", role.prefix(), index),
        }
    }
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Cooperative stop signal shared between a client task and the orchestrator.
///
/// Moves `idle → running → stopped` at most once. Stopping an idle flag means
/// the run loop never starts.
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicU8>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the running state. Returns false if the flag was already used.
    pub fn start(&self) -> bool {
        self.0
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn stop(&self) {
        self.0.store(STOPPED, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire) == STOPPED
    }
}

/// Client behavior errors
#[derive(Debug, Error)]
pub enum BehaviorError {
    #[error("{username} could not connect to {endpoint}: {source}")]
    Connect {
        username: String,
        endpoint: ServerEndpoint,
        #[source]
        source: MessagingError,
    },

    #[error("Protocol violation by {username}: {reason}")]
    ProtocolViolation { username: String, reason: String },
}

/// A simulated client's interaction pattern
#[async_trait]
pub trait ClientBehavior: Send {
    fn session(&self) -> &ClientSession;

    fn session_mut(&mut self) -> &mut ClientSession;

    /// Perform one operation cycle
    async fn cycle(&mut self) -> Result<(), BehaviorError>;

    /// Reseed random sources once connected
    fn on_connected(&mut self, _seed_key: &str) {}

    fn identity(&self) -> &ClientIdentity {
        self.session().identity()
    }

    fn stop_handle(&self) -> RunFlag {
        self.session().flag().clone()
    }

    fn signal_stop(&self) {
        self.session().flag().stop();
    }

    async fn connect(&mut self, endpoint: &ServerEndpoint) -> Result<(), BehaviorError> {
        let seed_key = self.session_mut().connect(endpoint).await?;
        self.on_connected(&seed_key);
        Ok(())
    }

    /// Repeat `cycle` until stopped. A failing cycle stops the client.
    async fn run(&mut self) -> Result<(), BehaviorError> {
        let flag = self.stop_handle();
        if !flag.start() {
            return Ok(());
        }

        while flag.is_running() {
            if let Err(e) = self.cycle().await {
                flag.stop();
                return Err(e);
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.session_mut().disconnect().await;
    }
}
