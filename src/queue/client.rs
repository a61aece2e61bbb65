//! Queue client seam and an in-memory implementation.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Message, MessageId};

/// Errors raised by a [`QueueClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue was never created
    #[error("queue '{0}' does not exist")]
    UnknownQueue(String),
    /// The message is not currently delivered to this client
    #[error("message '{0}' is not in flight")]
    NotInFlight(MessageId),
    /// Any backend failure
    #[error("queue backend failed: {0}")]
    Backend(String),
}

/// Storage and transport of queue messages.
///
/// Implementations own redelivery counting and any dead-letter policy.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Creates `queue`. Creating an existing queue succeeds.
    async fn create(&self, queue: &str) -> Result<(), QueueError>;

    /// Enqueues a message, visible after `delay`.
    async fn send(
        &self,
        queue: &str,
        body: String,
        headers: HashMap<String, String>,
        delay: Duration,
    ) -> Result<MessageId, QueueError>;

    /// Returns up to `max` visible messages, waiting up to `wait` for the first.
    async fn receive(
        &self,
        queue: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, QueueError>;

    /// Confirms processing of a received message.
    async fn ack(&self, queue: &str, id: &MessageId) -> Result<(), QueueError>;

    /// Returns a received message to the queue, visible again after `delay`.
    async fn nack(&self, queue: &str, id: &MessageId, delay: Duration) -> Result<(), QueueError>;
}

/// A message waiting for its visibility time.
///
/// Ordered so that `BinaryHeap` pops the earliest entry first.
#[derive(Debug)]
struct Scheduled {
    visible_at: Instant,
    seq: u64,
    message: Message,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.visible_at == other.visible_at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .visible_at
            .cmp(&self.visible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    scheduled: BinaryHeap<Scheduled>,
    in_flight: HashMap<MessageId, Message>,
    acked: Vec<MessageId>,
    nacked: Vec<MessageId>,
    dead_letters: Vec<Message>,
}

impl QueueState {
    fn promote(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.visible_at > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.message);
            }
        }
    }

    fn next_visible(&self) -> Option<Instant> {
        self.scheduled.peek().map(|entry| entry.visible_at)
    }
}

#[derive(Debug, Default)]
struct Queues {
    queues: HashMap<String, QueueState>,
    seq: u64,
}

impl Queues {
    fn get_mut(&mut self, queue: &str) -> Result<&mut QueueState, QueueError> {
        self.queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))
    }

    fn schedule(&mut self, queue: &str, message: Message, delay: Duration) -> Result<(), QueueError> {
        self.seq += 1;
        let seq = self.seq;
        let state = self.get_mut(queue)?;
        if delay.is_zero() {
            state.ready.push_back(message);
        } else {
            state.scheduled.push(Scheduled {
                visible_at: Instant::now() + delay,
                seq,
                message,
            });
        }
        Ok(())
    }
}

/// In-process queue for development and tests.
///
/// Delayed messages become visible after their delay. A nacked message is
/// redelivered with its redelivery count incremented; once a message has
/// been delivered `max_deliveries` times it moves to the dead-letter list
/// instead.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use dispatch_core::queue::{InMemoryQueue, QueueClient};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let queue = InMemoryQueue::new();
/// queue.create("jobs").await.unwrap();
/// queue.send("jobs", "{}".into(), HashMap::new(), Duration::ZERO).await.unwrap();
///
/// let received = queue.receive("jobs", 10, Duration::from_millis(10)).await.unwrap();
/// assert_eq!(received.len(), 1);
/// queue.ack("jobs", &received[0].id).await.unwrap();
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<Queues>>,
    notify: Arc<Notify>,
    max_deliveries: Option<u32>,
}

impl InMemoryQueue {
    /// Creates a queue client that redelivers forever.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dead-letters messages after `max` deliveries.
    pub fn with_max_deliveries(mut self, max: u32) -> Self {
        self.max_deliveries = Some(max);
        self
    }

    /// Enqueues a fully formed message as-is, keeping its id and redelivery count.
    pub async fn enqueue(&self, queue: &str, message: Message) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .schedule(queue, message, Duration::ZERO)?;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Ids acked on `queue`, in ack order.
    pub async fn acked(&self, queue: &str) -> Vec<MessageId> {
        self.inspect(queue, |s| s.acked.clone()).await
    }

    /// Ids nacked on `queue`, in nack order.
    pub async fn nacked(&self, queue: &str) -> Vec<MessageId> {
        self.inspect(queue, |s| s.nacked.clone()).await
    }

    /// Messages that exhausted their deliveries.
    pub async fn dead_letters(&self, queue: &str) -> Vec<Message> {
        self.inspect(queue, |s| s.dead_letters.clone()).await
    }

    /// Number of messages waiting, visible or delayed.
    pub async fn pending(&self, queue: &str) -> usize {
        self.inspect(queue, |s| s.ready.len() + s.scheduled.len())
            .await
    }

    /// Number of messages received but neither acked nor nacked.
    pub async fn in_flight(&self, queue: &str) -> usize {
        self.inspect(queue, |s| s.in_flight.len()).await
    }

    async fn inspect<T: Default>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> T {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(f)
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn create(&self, queue: &str) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn send(
        &self,
        queue: &str,
        body: String,
        headers: HashMap<String, String>,
        delay: Duration,
    ) -> Result<MessageId, QueueError> {
        let id = MessageId::random();
        let message = Message {
            id: id.clone(),
            headers,
            body,
            redelivery_count: 0,
        };
        self.state.lock().await.schedule(queue, message, delay)?;
        self.notify.notify_waiters();
        tracing::trace!(queue, message_id = %id, ?delay, "message enqueued");
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let wake_at = {
                let mut guard = self.state.lock().await;
                let state = guard.get_mut(queue)?;
                state.promote(Instant::now());

                let take = max.min(state.ready.len());
                if take > 0 {
                    let batch: Vec<Message> = state.ready.drain(..take).collect();
                    for message in &batch {
                        state.in_flight.insert(message.id.clone(), message.clone());
                    }
                    return Ok(batch);
                }
                state
                    .next_visible()
                    .map_or(deadline, |visible| visible.min(deadline))
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn ack(&self, queue: &str, id: &MessageId) -> Result<(), QueueError> {
        let mut guard = self.state.lock().await;
        let state = guard.get_mut(queue)?;
        state
            .in_flight
            .remove(id)
            .ok_or_else(|| QueueError::NotInFlight(id.clone()))?;
        state.acked.push(id.clone());
        Ok(())
    }

    async fn nack(&self, queue: &str, id: &MessageId, delay: Duration) -> Result<(), QueueError> {
        let mut guard = self.state.lock().await;
        let state = guard.get_mut(queue)?;
        let mut message = state
            .in_flight
            .remove(id)
            .ok_or_else(|| QueueError::NotInFlight(id.clone()))?;
        state.nacked.push(id.clone());
        message.redelivery_count += 1;

        if self
            .max_deliveries
            .is_some_and(|max| message.redelivery_count >= max)
        {
            tracing::warn!(queue, message_id = %id, deliveries = message.redelivery_count, "message dead-lettered");
            state.dead_letters.push(message);
            return Ok(());
        }

        guard.schedule(queue, message, delay)?;
        drop(guard);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue_with(name: &str) -> InMemoryQueue {
        let queue = InMemoryQueue::new();
        queue.create(name).await.unwrap();
        queue
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let queue = queue_with("q").await;
        queue
            .send("q", "a".into(), HashMap::new(), Duration::ZERO)
            .await
            .unwrap();
        queue.create("q").await.unwrap();

        assert_eq!(queue.pending("q").await, 1);
    }

    #[tokio::test]
    async fn send_to_unknown_queue_fails() {
        let queue = InMemoryQueue::new();
        let err = queue
            .send("nope", "a".into(), HashMap::new(), Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::UnknownQueue("nope".into()));
    }

    #[tokio::test]
    async fn receive_times_out_empty() {
        let queue = queue_with("q").await;
        let received = queue.receive("q", 5, Duration::from_millis(5)).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn receive_respects_max() {
        let queue = queue_with("q").await;
        for body in ["1", "2", "3"] {
            queue
                .send("q", body.into(), HashMap::new(), Duration::ZERO)
                .await
                .unwrap();
        }

        let first = queue.receive("q", 2, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].body, "1");
        assert_eq!(queue.in_flight("q").await, 2);
        assert_eq!(queue.pending("q").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_messages_become_visible() {
        let queue = queue_with("q").await;
        queue
            .send("q", "later".into(), HashMap::new(), Duration::from_secs(30))
            .await
            .unwrap();

        assert!(queue
            .receive("q", 1, Duration::from_secs(1))
            .await
            .unwrap()
            .is_empty());

        let received = queue.receive("q", 1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(received[0].body, "later");
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_count() {
        let queue = queue_with("q").await;
        queue
            .send("q", "x".into(), HashMap::new(), Duration::ZERO)
            .await
            .unwrap();

        let first = queue.receive("q", 1, Duration::ZERO).await.unwrap();
        queue.nack("q", &first[0].id, Duration::ZERO).await.unwrap();

        let second = queue.receive("q", 1, Duration::ZERO).await.unwrap();
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].redelivery_count, 1);
        assert_eq!(queue.nacked("q").await, vec![first[0].id.clone()]);
    }

    #[tokio::test]
    async fn exhausted_messages_are_dead_lettered() {
        let queue = InMemoryQueue::new().with_max_deliveries(2);
        queue.create("q").await.unwrap();
        queue
            .send("q", "x".into(), HashMap::new(), Duration::ZERO)
            .await
            .unwrap();

        for _ in 0..2 {
            let received = queue.receive("q", 1, Duration::ZERO).await.unwrap();
            queue.nack("q", &received[0].id, Duration::ZERO).await.unwrap();
        }

        assert_eq!(queue.pending("q").await, 0);
        assert_eq!(queue.dead_letters("q").await[0].redelivery_count, 2);
    }

    #[tokio::test]
    async fn ack_of_unknown_message_fails() {
        let queue = queue_with("q").await;
        let err = queue
            .ack("q", &MessageId("ghost".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotInFlight(_)));
    }
}
