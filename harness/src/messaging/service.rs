//! MessagingClient trait definition

use async_trait::async_trait;

use super::types::{Message, MessagingError, OutgoingMessage, ServerEndpoint};

/// Session with a queue-based messaging service, owned by exactly one simulated client
#[async_trait]
pub trait MessagingClient: Send {
    /// Username this session logs in with
    fn username(&self) -> &str;

    /// Log in to the given server
    async fn connect(&mut self, endpoint: &ServerEndpoint) -> Result<(), MessagingError>;

    /// Log out and close the session
    async fn disconnect(&mut self) -> Result<(), MessagingError>;

    /// Send a message to every queue it names
    async fn send_message(&mut self, message: &OutgoingMessage) -> Result<(), MessagingError>;

    /// Look at the top message of a queue visible to this client, removing it when `pop` is set.
    ///
    /// Returns `Ok(None)` when the queue holds no message for this client.
    async fn view_message_from_queue(
        &mut self,
        queue: &str,
        pop: bool,
    ) -> Result<Option<Message>, MessagingError>;

    /// List the queues holding at least one message addressed to this client
    async fn get_waiting_queues(&mut self) -> Result<Vec<String>, MessagingError>;
}

/// Creates one messaging session per simulated client
pub trait ClientConnector: Send + Sync {
    fn client(&self, username: &str) -> Box<dyn MessagingClient>;
}
