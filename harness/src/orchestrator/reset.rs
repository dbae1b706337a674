//! Hooks run between iterations

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::TraceError;
use crate::messaging::MemoryBroker;

/// Brings the messaging system back to a known state before the next iteration
#[async_trait]
pub trait IterationReset: Send + Sync {
    async fn reset(&self, next_iteration: usize) -> Result<(), TraceError>;
}

/// Leaves the system as it is
pub struct NoReset;

#[async_trait]
impl IterationReset for NoReset {
    async fn reset(&self, _next_iteration: usize) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Runs a shell command. The next iteration index is exported as
/// `QUEUETRACE_ITERATION`.
pub struct CommandReset {
    command: String,
}

impl CommandReset {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl IterationReset for CommandReset {
    async fn reset(&self, next_iteration: usize) -> Result<(), TraceError> {
        info!("Running reset command: {}", self.command);
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("QUEUETRACE_ITERATION", next_iteration.to_string())
            .status()
            .await
            .map_err(|e| TraceError::Reset(format!("failed to start {:?}: {e}", self.command)))?;

        if status.success() {
            Ok(())
        } else {
            Err(TraceError::Reset(format!(
                "{:?} exited with {status}",
                self.command
            )))
        }
    }
}

/// Empties the in-process broker and makes sure every queue exists
pub struct BrokerReset {
    broker: Arc<MemoryBroker>,
    queues: Vec<String>,
}

impl BrokerReset {
    pub fn new(broker: Arc<MemoryBroker>, queues: Vec<String>) -> Self {
        Self { broker, queues }
    }
}

#[async_trait]
impl IterationReset for BrokerReset {
    async fn reset(&self, next_iteration: usize) -> Result<(), TraceError> {
        debug!("Resetting broker before iteration {}", next_iteration);
        self.broker.purge().await;
        self.broker.create_queues(self.queues.iter().cloned()).await;
        Ok(())
    }
}
