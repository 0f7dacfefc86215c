use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: Uuid,
    pub body: String,
    /// How many times this message has been handed out, this delivery included.
    pub dequeue_count: u32,
    pub inserted_at: DateTime<Utc>,
}

impl QueueMessage {
    /// Returns true if the message was delivered before.
    pub fn is_redelivery(&self) -> bool {
        self.dequeue_count > 1
    }
}

/// FIFO message queues.
///
/// `receive_one` leases a message and then deletes it. If the delete fails
/// the message is still returned and becomes visible again later, so a
/// message may be delivered more than once. Consumers must be idempotent.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Creates a queue. Returns `true` if it was created.
    async fn create_queue_if_not_exists(&self, queue: &str) -> Result<bool>;

    /// Appends a message to the queue.
    async fn send(&self, queue: &str, body: String) -> Result<()>;

    /// Receives the oldest visible message, or `None` if the queue is empty.
    async fn receive_one(&self, queue: &str) -> Result<Option<QueueMessage>>;
}
