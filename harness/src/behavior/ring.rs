//! "Larry": counter relay around a ring of peers
//!
//! Every member starts with the message `"1 <selfName>\n"`. Each cycle it
//! sends its current message to a random ring queue, addressed to a random
//! member (itself included), then waits for a message addressed to it, pops
//! it and appends `"<counter+1> <selfName>\n"` to form its next message.
//! The oldest lines are dropped once the content outgrows the size bound.
//! Unaddressed messages popped from a shared queue are dropped.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::debug;

use super::{BehaviorError, ClientBehavior, ClientSession, Role};
use crate::messaging::OutgoingMessage;
use crate::wait::seed_from_key;

const RELAY_PRIORITY: u8 = 5;
const RELAY_CONTEXT: i32 = 0;

/// Errors when extending a relayed message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingParseError {
    #[error("Relayed message has no counter line")]
    Empty,

    #[error("Malformed counter line: {0:?}")]
    MalformedLine(String),

    #[error("Counter overflow")]
    CounterOverflow,

    #[error("Counter line of {size} bytes exceeds the {limit} byte limit")]
    LineTooLong { size: usize, limit: usize },
}

/// Longest counter line a member of a ring of `ring_size` can append
pub fn max_counter_line_len(ring_size: usize) -> usize {
    let widest_name = format!("{}{}", Role::Larry.prefix(), ring_size.saturating_sub(1));
    u64::MAX.to_string().len() + 1 + widest_name.len() + 1
}

/// Extend a relayed message with this member's counter line, dropping the
/// oldest lines until it fits in `limit` bytes.
pub fn relay_content(content: &str, self_name: &str, limit: usize) -> Result<String, RingParseError> {
    let last = content
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or(RingParseError::Empty)?;

    let mut fields = last.split_whitespace();
    let counter: u64 = match (fields.next(), fields.next(), fields.next()) {
        (Some(counter), Some(_sender), None) => counter
            .parse()
            .map_err(|_| RingParseError::MalformedLine(last.to_string()))?,
        _ => return Err(RingParseError::MalformedLine(last.to_string())),
    };
    let next = counter.checked_add(1).ok_or(RingParseError::CounterOverflow)?;

    let appended = format!("{next} {self_name}\n");
    if appended.len() > limit {
        return Err(RingParseError::LineTooLong {
            size: appended.len(),
            limit,
        });
    }

    let mut relayed = String::with_capacity(content.len() + appended.len() + 1);
    relayed.push_str(content);
    if !relayed.is_empty() && !relayed.ends_with('\n') {
        relayed.push('\n');
    }
    relayed.push_str(&appended);

    let mut start = 0;
    while relayed.len() - start > limit {
        match relayed[start..].find('\n') {
            Some(pos) => start += pos + 1,
            None => break,
        }
    }
    Ok(relayed.split_off(start))
}

pub struct RingRelay {
    session: ClientSession,
    ring_size: usize,
    queues: Arc<[String]>,
    message_size: usize,
    current: String,
    rng: ChaCha8Rng,
}

impl RingRelay {
    pub fn new(
        session: ClientSession,
        ring_size: usize,
        queues: Arc<[String]>,
        message_size: usize,
    ) -> Self {
        let current = format!("1 {}\n", session.username());
        Self {
            session,
            ring_size: ring_size.max(1),
            queues,
            message_size,
            current,
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
        }
    }

    /// Message this member will send next
    pub fn current(&self) -> &str {
        &self.current
    }
}

#[async_trait]
impl ClientBehavior for RingRelay {
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
        if self.current.len() > self.message_size {
            return Err(self.session.violation(format!(
                "ring message of {} bytes exceeds the {} byte limit",
                self.current.len(),
                self.message_size
            )));
        }
        let Some(queue) = self.queues.choose(&mut self.rng).cloned() else {
            return Err(self.session.violation("no ring queue to send to"));
        };
        let receiver = format!(
            "{}{}",
            Role::Larry.prefix(),
            self.rng.random_range(0..self.ring_size)
        );

        let outgoing = OutgoingMessage::new(self.current.clone(), RELAY_PRIORITY, vec![queue])
            .with_context(RELAY_CONTEXT)
            .addressed_to(receiver);
        if !self.session.send(&outgoing).await {
            // Keep the message and resend it next cycle
            self.session.pause().await;
            return Ok(());
        }

        let received = loop {
            let Some(queue) = self.session.await_waiting_queue().await else {
                return Ok(());
            };
            match self.session.try_pop(&queue).await {
                Ok(Some(message)) if message.receiver.as_deref() == Some(self.session.username()) => {
                    break message;
                }
                Ok(Some(message)) => {
                    // Broadcast traffic sharing the ring queues
                    debug!(
                        "{} skipped unaddressed message from {} on {}",
                        self.session.username(),
                        message.sender,
                        queue
                    );
                }
                Ok(None) => {
                    return Err(self
                        .session
                        .violation(format!("queue {queue} was reported waiting but held no message")));
                }
                Err(e) => {
                    debug!("{} pop from {} failed: {}", self.session.username(), queue, e);
                    self.session.pause().await;
                }
            }
        };

        self.current = relay_content(&received.content, self.session.username(), self.message_size)
            .map_err(|e| {
                self.session
                    .violation(format!("message from {}: {}", received.sender, e))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventKind;
    use crate::test_utils::{broker_with_queues, connected_session, queue_set};

    #[test]
    fn test_relay_appends_next_counter() {
        let relayed = relay_content("1 Larry0\n", "Larry3", 2000).unwrap();
        assert_eq!(relayed, "1 Larry0\n2 Larry3\n");

        let relayed = relay_content("1 Larry0\n2 Larry3", "Larry1", 2000).unwrap();
        assert_eq!(relayed, "1 Larry0\n2 Larry3\n3 Larry1\n");
    }

    #[test]
    fn test_relay_drops_oldest_lines_first() {
        let relayed = relay_content("7 Larry0\n8 Larry1\n", "Larry2", 20).unwrap();
        assert_eq!(relayed, "8 Larry1\n9 Larry2\n");
        assert!(relayed.len() <= 20);

        let relayed = relay_content("7 Larry0\n8 Larry1\n", "Larry2", 9).unwrap();
        assert_eq!(relayed, "9 Larry2\n");
    }

    #[test]
    fn test_relay_stays_within_bound_over_many_hops() {
        let mut content = "1 Larry0\n".to_string();
        for hop in 0..500 {
            content = relay_content(&content, &format!("Larry{}", hop % 6), 120).unwrap();
            assert!(content.len() <= 120);
        }

        let counters: Vec<u64> = content
            .lines()
            .map(|line| line.split_whitespace().next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(*counters.last().unwrap(), 501);
        assert!(counters.windows(2).all(|pair| pair[1] == pair[0] + 1));
    }

    #[test]
    fn test_relay_rejects_malformed_content() {
        assert_eq!(relay_content("\n \n", "Larry0", 100), Err(RingParseError::Empty));
        assert!(matches!(
            relay_content("hello world\n", "Larry0", 100),
            Err(RingParseError::MalformedLine(_))
        ));
        assert!(matches!(
            relay_content("3\n", "Larry0", 100),
            Err(RingParseError::MalformedLine(_))
        ));
        assert_eq!(
            relay_content(&format!("{} Larry1\n", u64::MAX), "Larry0", 100),
            Err(RingParseError::CounterOverflow)
        );
        assert!(matches!(
            relay_content("1 Larry1\n", "Larry0", 4),
            Err(RingParseError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_counter_line_bound_covers_widest_line() {
        let widest = format!("{} Larry11\n", u64::MAX);
        assert_eq!(max_counter_line_len(12), widest.len());
        assert_eq!(max_counter_line_len(1), format!("{} Larry0\n", u64::MAX).len());
        let last = format!("{} Larry0\n", u64::MAX - 1);
        assert!(relay_content(&last, "Larry11", max_counter_line_len(12)).is_ok());
    }

    #[tokio::test]
    async fn test_oversized_first_message_is_a_violation() {
        let (broker, endpoint) = broker_with_queues(&["R0"]).await;
        let session = connected_session(&broker, &endpoint, Role::Larry, 0).await;
        let mut larry = RingRelay::new(session, 1, queue_set(&["R0"]), 5);
        larry.stop_handle().start();

        let outcome = larry.cycle().await;
        assert!(matches!(outcome, Err(BehaviorError::ProtocolViolation { .. })));
        assert_eq!(larry.session().events().get(EventKind::Send), 0);
        assert_eq!(broker.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_single_member_ring_relays_to_itself() {
        let (broker, endpoint) = broker_with_queues(&["R0", "R1"]).await;
        let session = connected_session(&broker, &endpoint, Role::Larry, 0).await;
        let mut larry = RingRelay::new(session, 1, queue_set(&["R0", "R1"]), 2000);
        assert!(larry.stop_handle().start());

        larry.cycle().await.unwrap();
        assert_eq!(larry.current(), "1 Larry0\n2 Larry0\n");
        larry.cycle().await.unwrap();
        assert_eq!(larry.current(), "1 Larry0\n2 Larry0\n3 Larry0\n");

        let events = larry.session().events();
        assert_eq!(events.get(EventKind::Send), 2);
        assert_eq!(events.get(EventKind::QueueFound), 2);
        assert_eq!(events.get(EventKind::Read), 2);
    }

    #[tokio::test]
    async fn test_garbage_from_peer_is_a_violation() {
        let (broker, endpoint) = broker_with_queues(&["R0"]).await;
        let mut intruder = connected_session(&broker, &endpoint, Role::Larry, 1).await;
        intruder
            .send(&OutgoingMessage::new("not a counter", 10, vec!["R0".into()]).addressed_to("Larry0"))
            .await;

        let session = connected_session(&broker, &endpoint, Role::Larry, 0).await;
        let mut larry = RingRelay::new(session, 2, queue_set(&["R0"]), 2000);
        larry.stop_handle().start();

        let outcome = larry.cycle().await;
        assert!(matches!(outcome, Err(BehaviorError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_unaddressed_traffic_is_skipped() {
        let (broker, endpoint) = broker_with_queues(&["R0"]).await;
        let mut alice = connected_session(&broker, &endpoint, Role::Alice, 0).await;
        alice
            .send(&OutgoingMessage::new("broadcast", 10, vec!["R0".into()]))
            .await;

        let session = connected_session(&broker, &endpoint, Role::Larry, 0).await;
        let mut larry = RingRelay::new(session, 1, queue_set(&["R0"]), 2000);
        larry.stop_handle().start();

        larry.cycle().await.unwrap();
        assert_eq!(larry.current(), "1 Larry0\n2 Larry0\n");
        assert_eq!(larry.session().events().get(EventKind::Read), 2);
    }

    #[tokio::test]
    async fn test_stopped_member_leaves_wait_loop() {
        let (broker, endpoint) = broker_with_queues(&["R0"]).await;
        let session = connected_session(&broker, &endpoint, Role::Larry, 0).await;
        // Ring of two where Larry1 never shows up
        let mut larry = RingRelay::new(session, 2, queue_set(&["R0"]), 2000);
        let flag = larry.stop_handle();

        let task = tokio::spawn(async move { larry.run().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        flag.stop();

        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("ring member should stop")
            .unwrap()
            .unwrap();
    }
}
