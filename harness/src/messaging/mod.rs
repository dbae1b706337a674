//! Messaging service capability interface
//!
//! This module provides:
//! - `MessagingClient` trait, the narrow interface every simulated client drives
//! - `ClientConnector` for creating one session per client
//! - `MemoryBroker`, an in-process implementation used by the CLI and tests

mod memory;
mod service;
mod types;

pub use memory::{MemoryBroker, MemoryClient, MemoryConnector};
pub use service::{ClientConnector, MessagingClient};
pub use types::{
    MAX_PRIORITY, MIN_PRIORITY, Message, MessagingError, OutgoingMessage, ServerEndpoint,
};
