//! "Bob": pops from one randomly chosen queue per cycle

use std::sync::Arc;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;

use super::{BehaviorError, ClientBehavior, ClientSession};
use crate::wait::{WaitSpec, WaitTime, seed_from_key};

pub struct SimpleReader {
    session: ClientSession,
    queues: Arc<[String]>,
    wait: Option<WaitTime>,
    rng: ChaCha8Rng,
}

impl SimpleReader {
    pub fn new(session: ClientSession, queues: Arc<[String]>, wait: Option<WaitSpec>) -> Self {
        Self {
            session,
            queues,
            wait: wait.map(WaitTime::new),
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
        }
    }
}

#[async_trait]
impl ClientBehavior for SimpleReader {
    fn session(&self) -> &ClientSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    fn on_connected(&mut self, seed_key: &str) {
        self.rng = ChaCha8Rng::seed_from_u64(seed_from_key(seed_key));
        if let Some(wait) = &mut self.wait {
            wait.seed(seed_key);
        }
    }

    async fn cycle(&mut self) -> Result<(), BehaviorError> {
        let Some(queue) = self.queues.choose(&mut self.rng).cloned() else {
            return Err(self.session.violation("no queue to read from"));
        };

        self.session.pop(&queue).await;

        if let Some(wait) = &mut self.wait {
            wait.wait().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::Role;
    use crate::event_log::EventKind;
    use crate::messaging::OutgoingMessage;
    use crate::test_utils::{broker_with_queues, connected_session, queue_set};

    #[tokio::test]
    async fn test_reader_records_read_then_miss() {
        let (broker, endpoint) = broker_with_queues(&["Q0"]).await;
        let mut alice = connected_session(&broker, &endpoint, Role::Alice, 0).await;
        alice
            .send(&OutgoingMessage::new("hello", 4, vec!["Q0".into()]))
            .await;

        let session = connected_session(&broker, &endpoint, Role::Bob, 0).await;
        let mut bob = SimpleReader::new(session, queue_set(&["Q0"]), None);
        bob.cycle().await.unwrap();
        bob.cycle().await.unwrap();

        let events = bob.session().events();
        assert_eq!(events.get(EventKind::Read), 1);
        assert_eq!(events.get(EventKind::Miss), 1);
        assert_eq!(broker.queue_depth("Q0").await, Some(0));
    }

    #[tokio::test]
    async fn test_reader_without_queues_is_a_violation() {
        let (broker, endpoint) = broker_with_queues(&["Q0"]).await;
        let session = connected_session(&broker, &endpoint, Role::Bob, 1).await;
        let mut bob = SimpleReader::new(session, queue_set(&[]), None);
        assert!(bob.cycle().await.is_err());
    }
}
