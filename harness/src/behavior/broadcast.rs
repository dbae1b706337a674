//! "Alice": sends one fixed payload to a random sample of queues per cycle

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{BehaviorError, ClientBehavior, ClientSession, PayloadSource};
use crate::messaging::{MAX_PRIORITY, MIN_PRIORITY, OutgoingMessage};
use crate::wait::{WaitSpec, WaitTime, seed_from_key};

pub struct BroadcastSender {
    session: ClientSession,
    queues: Arc<[String]>,
    fanout: usize,
    payloads: PayloadSource,
    message_size: usize,
    /// Built on the first cycle, then reused
    message: Option<OutgoingMessage>,
    wait: Option<WaitTime>,
    rng: ChaCha8Rng,
}

impl BroadcastSender {
    pub fn new(
        session: ClientSession,
        queues: Arc<[String]>,
        fanout: usize,
        payloads: PayloadSource,
        message_size: usize,
        wait: Option<WaitSpec>,
    ) -> Self {
        Self {
            session,
            queues,
            fanout: fanout.max(1),
            payloads,
            message_size,
            message: None,
            wait: wait.map(WaitTime::new),
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
        }
    }
}

#[async_trait]
impl ClientBehavior for BroadcastSender {
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
        if self.queues.is_empty() {
            return Err(self.session.violation("no queue to send to"));
        }

        let mut message = match self.message.take() {
            Some(message) => message,
            None => {
                let content = self.payloads.build(
                    self.session.username(),
                    self.message_size,
                    &mut self.rng,
                );
                OutgoingMessage::new(content, MIN_PRIORITY, Vec::new())
            }
        };

        let k = self.fanout.min(self.queues.len());
        message.queues = index::sample(&mut self.rng, self.queues.len(), k)
            .into_iter()
            .map(|i| self.queues[i].clone())
            .collect();
        message.priority = self.rng.random_range(MIN_PRIORITY..=MAX_PRIORITY);

        self.session.send(&message).await;
        self.message = Some(message);

        if let Some(wait) = &mut self.wait {
            wait.wait().await;
        }
        Ok(())
    }
}
