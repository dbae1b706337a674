//! Logged messaging operations shared by every client behavior

use std::time::Duration;

use tracing::debug;

use super::{BehaviorError, ClientIdentity, RunFlag};
use crate::event_log::{EventCounts, EventKind, EventLog, now_millis};
use crate::messaging::{Message, MessagingClient, MessagingError, OutgoingMessage, ServerEndpoint};

/// A client's messaging session together with its event stream and run flag
pub struct ClientSession {
    identity: ClientIdentity,
    client: Box<dyn MessagingClient>,
    log: EventLog,
    flag: RunFlag,
    poll_interval: Duration,
}

impl ClientSession {
    pub fn new(
        identity: ClientIdentity,
        client: Box<dyn MessagingClient>,
        log: EventLog,
        poll_interval: Duration,
    ) -> Self {
        Self {
            identity,
            client,
            log,
            flag: RunFlag::new(),
            poll_interval,
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn flag(&self) -> &RunFlag {
        &self.flag
    }

    pub fn events(&self) -> &EventCounts {
        self.log.counts()
    }

    /// Log in and record `CONNECT`.
    ///
    /// Returns the seed key for this client's random sources.
    pub async fn connect(&mut self, endpoint: &ServerEndpoint) -> Result<String, BehaviorError> {
        let start = now_millis();
        self.client
            .connect(endpoint)
            .await
            .map_err(|source| BehaviorError::Connect {
                username: self.identity.username.clone(),
                endpoint: endpoint.clone(),
                source,
            })?;
        let end = now_millis();
        self.log.record(EventKind::Connect, start, end);
        debug!("{} connected to {}", self.identity.username, endpoint);

        Ok(format!("{}-{}", self.identity.username, start))
    }

    /// Log out and record `DISCONNECT`, even when the service reports an error
    pub async fn disconnect(&mut self) {
        let start = now_millis();
        if let Err(e) = self.client.disconnect().await {
            debug!("{} disconnect reported: {}", self.identity.username, e);
        }
        let end = now_millis();
        self.log.record(EventKind::Disconnect, start, end);
        self.log.flush();
    }

    /// Send a message, recording `SEND` or `ERROR_SEND`
    pub async fn send(&mut self, message: &OutgoingMessage) -> bool {
        let start = now_millis();
        let result = self.client.send_message(message).await;
        let end = now_millis();

        match result {
            Ok(()) => {
                self.log.record(EventKind::Send, start, end);
                true
            }
            Err(e) => {
                self.log.record(EventKind::ErrorSend, start, end);
                debug!("{} send failed: {}", self.identity.username, e);
                false
            }
        }
    }

    /// Pop the top message of a queue, recording `READ` or `MISS`
    pub async fn try_pop(&mut self, queue: &str) -> Result<Option<Message>, MessagingError> {
        let start = now_millis();
        let result = self.client.view_message_from_queue(queue, true).await;
        let end = now_millis();

        let kind = match &result {
            Ok(Some(_)) => EventKind::Read,
            _ => EventKind::Miss,
        };
        self.log.record(kind, start, end);
        result
    }

    /// Like `try_pop`, treating a failed call as an empty queue
    pub async fn pop(&mut self, queue: &str) -> Option<Message> {
        match self.try_pop(queue).await {
            Ok(message) => message,
            Err(e) => {
                debug!("{} read from {} failed: {}", self.identity.username, queue, e);
                None
            }
        }
    }

    /// Pop from `queue` until a message arrives or the run flag drops
    pub async fn poll_pop(&mut self, queue: &str) -> Option<Message> {
        while self.flag.is_running() {
            if let Some(message) = self.pop(queue).await {
                return Some(message);
            }
            self.pause().await;
        }
        None
    }

    /// Queues holding a message addressed to this client, recording
    /// `QUEUE_FOUND` or `NO_QUEUE`
    pub async fn waiting_queues(&mut self) -> Result<Vec<String>, MessagingError> {
        let start = now_millis();
        let result = self.client.get_waiting_queues().await;
        let end = now_millis();

        let kind = match &result {
            Ok(queues) if !queues.is_empty() => EventKind::QueueFound,
            _ => EventKind::NoQueue,
        };
        self.log.record(kind, start, end);
        result
    }

    /// Poll for a queue holding a message addressed to this client until one
    /// is found or the run flag drops
    pub async fn await_waiting_queue(&mut self) -> Option<String> {
        while self.flag.is_running() {
            match self.waiting_queues().await {
                Ok(queues) if !queues.is_empty() => return queues.into_iter().next(),
                Ok(_) => {}
                Err(e) => debug!("{} waiting queue lookup failed: {}", self.identity.username, e),
            }
            self.pause().await;
        }
        None
    }

    /// Sleep one poll interval, or just yield when it is zero.
    ///
    /// The returned future owns the interval and does not borrow the session.
    pub fn pause(&self) -> impl Future<Output = ()> + Send + use<> {
        let interval = self.poll_interval;
        async move {
            if interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(interval).await;
            }
        }
    }

    pub fn violation(&self, reason: impl Into<String>) -> BehaviorError {
        BehaviorError::ProtocolViolation {
            username: self.identity.username.clone(),
            reason: reason.into(),
        }
    }
}
