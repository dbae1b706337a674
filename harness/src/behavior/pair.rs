//! "Tola" and "Maruja": request/response pairs on a shared pair queue
//!
//! Tola_i sends a request addressed to Maruja_i and blocks until the reply
//! arrives. Maruja_i blocks until a request arrives and answers with a
//! constant acknowledgement. Addressing keeps pairs apart on the one queue.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{BehaviorError, ClientBehavior, ClientSession, PayloadSource, Role};
use crate::messaging::{MAX_PRIORITY, MIN_PRIORITY, Message, OutgoingMessage};
use crate::wait::seed_from_key;

/// Reply sent by a request target
pub const ACKNOWLEDGEMENT: &str = "Request acknowledged.";

const ACK_PRIORITY: u8 = 10;
const ACK_CONTEXT: i32 = 0;

fn check_sender(
    session: &ClientSession,
    message: &Message,
    buddy: &str,
) -> Result<(), BehaviorError> {
    if message.sender == buddy {
        Ok(())
    } else {
        Err(session.violation(format!(
            "expected a message from {buddy}, got one from {}",
            message.sender
        )))
    }
}

/// Request source ("Tola")
pub struct RequestSource {
    session: ClientSession,
    buddy: String,
    queue: String,
    payloads: PayloadSource,
    message_size: usize,
    request: Option<String>,
    rng: ChaCha8Rng,
}

impl RequestSource {
    pub fn new(
        session: ClientSession,
        queue: String,
        payloads: PayloadSource,
        message_size: usize,
    ) -> Self {
        let buddy = format!("{}{}", Role::Maruja.prefix(), session.identity().index);
        Self {
            session,
            buddy,
            queue,
            payloads,
            message_size,
            request: None,
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
        }
    }

    pub fn buddy(&self) -> &str {
        &self.buddy
    }
}

#[async_trait]
impl ClientBehavior for RequestSource {
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
        if self.request.is_none() {
            let request =
                self.payloads
                    .build(self.session.username(), self.message_size, &mut self.rng);
            self.request = Some(request);
        }
        let content = self.request.clone().unwrap_or_default();

        let priority = self.rng.random_range(MIN_PRIORITY..=MAX_PRIORITY);
        let request = OutgoingMessage::new(content, priority, vec![self.queue.clone()])
            .addressed_to(self.buddy.clone());
        if !self.session.send(&request).await {
            self.session.pause().await;
            return Ok(());
        }

        let Some(reply) = self.session.poll_pop(&self.queue).await else {
            return Ok(());
        };
        check_sender(&self.session, &reply, &self.buddy)
    }
}

/// Request target ("Maruja")
pub struct RequestTarget {
    session: ClientSession,
    buddy: String,
    queue: String,
}

impl RequestTarget {
    pub fn new(session: ClientSession, queue: String) -> Self {
        let buddy = format!("{}{}", Role::Tola.prefix(), session.identity().index);
        Self {
            session,
            buddy,
            queue,
        }
    }

    pub fn buddy(&self) -> &str {
        &self.buddy
    }
}

#[async_trait]
impl ClientBehavior for RequestTarget {
    fn session(&self) -> &ClientSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    async fn cycle(&mut self) -> Result<(), BehaviorError> {
        let Some(request) = self.session.poll_pop(&self.queue).await else {
            return Ok(());
        };
        check_sender(&self.session, &request, &self.buddy)?;

        let ack = OutgoingMessage::new(ACKNOWLEDGEMENT, ACK_PRIORITY, vec![self.queue.clone()])
            .with_context(ACK_CONTEXT)
            .addressed_to(self.buddy.clone());
        // The source blocks until it hears back, so retry until delivered
        while !self.session.send(&ack).await {
            if !self.session.flag().is_running() {
                break;
            }
            self.session.pause().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event_log::EventKind;
    use crate::test_utils::{broker_with_queues, connected_session};

    #[tokio::test]
    async fn test_pair_exchange() {
        let (broker, endpoint) = broker_with_queues(&["Pairs"]).await;
        let tola_session = connected_session(&broker, &endpoint, Role::Tola, 2).await;
        let maruja_session = connected_session(&broker, &endpoint, Role::Maruja, 2).await;

        let mut tola = RequestSource::new(
            tola_session,
            "Pairs".to_string(),
            PayloadSource::builtin(),
            300,
        );
        let mut maruja = RequestTarget::new(maruja_session, "Pairs".to_string());
        assert_eq!(tola.buddy(), "Maruja2");
        assert_eq!(maruja.buddy(), "Tola2");

        let tola_flag = tola.stop_handle();
        let maruja_flag = maruja.stop_handle();
        let tola_task = tokio::spawn(async move {
            let result = tola.run().await;
            (tola, result)
        });
        let maruja_task = tokio::spawn(async move {
            let result = maruja.run().await;
            (maruja, result)
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tola_flag.stop();
        maruja_flag.stop();

        let (tola, tola_result) = tola_task.await.unwrap();
        let (maruja, maruja_result) = maruja_task.await.unwrap();
        tola_result.unwrap();
        maruja_result.unwrap();

        let tola_events = tola.session().events();
        let maruja_events = maruja.session().events();
        assert!(tola_events.get(EventKind::Send) > 0);
        assert!(maruja_events.get(EventKind::Send) > 0);
        // Every acknowledgement answers exactly one request
        assert!(maruja_events.get(EventKind::Send) <= tola_events.get(EventKind::Send));
        assert!(tola_events.get(EventKind::Read) <= maruja_events.get(EventKind::Send));
    }

    #[tokio::test]
    async fn test_target_rejects_stranger() {
        let (broker, endpoint) = broker_with_queues(&["Pairs"]).await;
        let mut stranger = connected_session(&broker, &endpoint, Role::Tola, 7).await;
        stranger
            .send(&OutgoingMessage::new("hi", 3, vec!["Pairs".into()]).addressed_to("Maruja0"))
            .await;

        let session = connected_session(&broker, &endpoint, Role::Maruja, 0).await;
        let mut maruja = RequestTarget::new(session, "Pairs".to_string());
        maruja.stop_handle().start();

        let err = maruja.cycle().await.unwrap_err();
        assert!(err.to_string().contains("Tola7"));
    }

    #[tokio::test]
    async fn test_target_acknowledges_buddy() {
        let (broker, endpoint) = broker_with_queues(&["Pairs"]).await;
        let mut tola = connected_session(&broker, &endpoint, Role::Tola, 0).await;
        tola.send(&OutgoingMessage::new("req", 3, vec!["Pairs".into()]).addressed_to("Maruja0"))
            .await;

        let session = connected_session(&broker, &endpoint, Role::Maruja, 0).await;
        let mut maruja = RequestTarget::new(session, "Pairs".to_string());
        maruja.stop_handle().start();
        maruja.cycle().await.unwrap();

        let reply = broker.snapshot("Pairs").await;
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0].content, ACKNOWLEDGEMENT);
        assert_eq!(reply[0].priority, 10);
        assert_eq!(reply[0].context, 0);
        assert_eq!(reply[0].sender, "Maruja0");
        assert_eq!(reply[0].receiver.as_deref(), Some("Tola0"));
    }
}
