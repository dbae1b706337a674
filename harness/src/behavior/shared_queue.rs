//! "Rick" and "Carl": one shared queue, drained and filled without pause

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{BehaviorError, ClientBehavior, ClientSession, PayloadSource};
use crate::messaging::{MAX_PRIORITY, MIN_PRIORITY, OutgoingMessage};
use crate::wait::seed_from_key;

/// Passive consumer ("Rick")
pub struct PassiveConsumer {
    session: ClientSession,
    queue: String,
}

impl PassiveConsumer {
    pub fn new(session: ClientSession, queue: String) -> Self {
        Self { session, queue }
    }
}

#[async_trait]
impl ClientBehavior for PassiveConsumer {
    fn session(&self) -> &ClientSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    async fn cycle(&mut self) -> Result<(), BehaviorError> {
        self.session.pop(&self.queue).await;
        Ok(())
    }
}

/// Persistent producer ("Carl"). Tags every message with its index.
pub struct PersistentProducer {
    session: ClientSession,
    queue: String,
    payloads: PayloadSource,
    message_size: usize,
    message: Option<OutgoingMessage>,
    rng: ChaCha8Rng,
}

impl PersistentProducer {
    pub fn new(
        session: ClientSession,
        queue: String,
        payloads: PayloadSource,
        message_size: usize,
    ) -> Self {
        Self {
            session,
            queue,
            payloads,
            message_size,
            message: None,
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
        }
    }
}

#[async_trait]
impl ClientBehavior for PersistentProducer {
    fn session(&self) -> &ClientSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    fn on_connected(&mut self, seed_key: &str) {
        self.rng = ChaCha8Rng::seed_from_u64(seed_from_key(seed_key));
    }

    async fn cycle(&mut self) -> Result<(), BehaviorError> {
        let mut message = match self.message.take() {
            Some(message) => message,
            None => {
                let content =
                    self.payloads
                        .build(self.session.username(), self.message_size, &mut self.rng);
                let context = i32::try_from(self.session.identity().index).unwrap_or(i32::MAX);
                OutgoingMessage::new(content, MIN_PRIORITY, vec![self.queue.clone()])
                    .with_context(context)
            }
        };
        message.priority = self.rng.random_range(MIN_PRIORITY..=MAX_PRIORITY);

        self.session.send(&message).await;
        self.message = Some(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::Role;
    use crate::event_log::EventKind;
    use crate::test_utils::{broker_with_queues, connected_session};

    #[tokio::test]
    async fn test_producer_tags_messages_with_index() {
        let (broker, endpoint) = broker_with_queues(&["Shared"]).await;
        let session = connected_session(&broker, &endpoint, Role::Carl, 4).await;
        let mut carl =
            PersistentProducer::new(session, "Shared".to_string(), PayloadSource::builtin(), 128);

        carl.cycle().await.unwrap();
        carl.cycle().await.unwrap();

        let messages = broker.snapshot("Shared").await;
        assert_eq!(messages.len(), 2);
        for message in &messages {
            assert_eq!(message.context, 4);
            assert_eq!(message.content.len(), 128);
            assert!(message.receiver.is_none());
        }
        assert_eq!(messages[0].content, messages[1].content);
    }

    #[tokio::test]
    async fn test_consumer_drains_shared_queue() {
        let (broker, endpoint) = broker_with_queues(&["Shared"]).await;
        let carl_session = connected_session(&broker, &endpoint, Role::Carl, 0).await;
        let mut carl =
            PersistentProducer::new(carl_session, "Shared".to_string(), PayloadSource::builtin(), 64);
        carl.cycle().await.unwrap();

        let rick_session = connected_session(&broker, &endpoint, Role::Rick, 0).await;
        let mut rick = PassiveConsumer::new(rick_session, "Shared".to_string());
        rick.cycle().await.unwrap();
        rick.cycle().await.unwrap();

        let events = rick.session().events();
        assert_eq!(events.get(EventKind::Read), 1);
        assert_eq!(events.get(EventKind::Miss), 1);
    }
}
