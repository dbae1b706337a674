//! Messaging types and error definitions

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Lowest priority accepted by the messaging service
pub const MIN_PRIORITY: u8 = 1;
/// Highest priority accepted by the messaging service
pub const MAX_PRIORITY: u8 = 10;

/// Errors reported by a messaging session
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Connection refused by {0}")]
    ConnectionRefused(ServerEndpoint),

    #[error("Client already online: {0}")]
    AlreadyOnline(String),

    #[error("Client is not connected")]
    NotConnected,

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue is full: {0}")]
    QueueFull(String),

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Invalid priority: {0}")]
    InvalidPriority(u8),

    #[error("Message has no target queue")]
    NoTargetQueue,
}

/// Address of one messaging server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServerEndpoint {
    pub address: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A message about to be sent to one or more queues
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Message body
    pub content: String,
    /// Priority in `[MIN_PRIORITY, MAX_PRIORITY]`
    pub priority: u8,
    /// Opaque context tag
    pub context: i32,
    /// Queues the message is delivered to
    pub queues: Vec<String>,
    /// Addressed receiver, if any
    pub receiver: Option<String>,
}

impl OutgoingMessage {
    pub fn new(content: impl Into<String>, priority: u8, queues: Vec<String>) -> Self {
        Self {
            content: content.into(),
            priority,
            context: 0,
            queues,
            receiver: None,
        }
    }

    pub fn with_context(mut self, context: i32) -> Self {
        self.context = context;
        self
    }

    pub fn addressed_to(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }
}

/// A message retrieved from a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Service-assigned identifier
    pub id: u64,
    /// Username of the sending client
    pub sender: String,
    /// Addressed receiver, if any
    pub receiver: Option<String>,
    /// Queue the message was retrieved from
    pub queue: String,
    pub context: i32,
    pub priority: u8,
    pub content: String,
}
