//! Event bus abstraction: keyed publication and manual-commit consumption.
//!
//! The bus carries at-least-once semantics: a message may be redelivered
//! after a crash between processing and commit, so every consumer must be
//! idempotent (Herald consumers deduplicate by event id and read-model
//! probes). Ordering is guaranteed within a partition; Herald keys every
//! message by aggregate id so one recipient's events share a partition.
//!
//! Commits are explicit and follow the read-model write: the consumer owns
//! the commit, not the subscription plumbing. This is what pins the
//! exactly-once *effect*: a crash before commit replays the message into an
//! idempotent handler.
//!
//! # Implementations
//!
//! - `KafkaEventBus` / `KafkaBusConsumer` (`herald-redpanda`) for production
//! - `MemoryBus` / `MemoryBusConsumer` (`herald-testing`) for tests

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to reach the bus at all.
    #[error("Bus connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to commit an offset.
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Transport-level receive error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The consumer was closed.
    #[error("Consumer closed")]
    Closed,
}

/// One message received from the bus, with enough context to commit it and
/// to dead-letter it deterministically (topic/partition/offset are part of
/// the dead-letter record).
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Source offset.
    pub offset: i64,
    /// Partition key, when the producer set one.
    pub key: Option<String>,
    /// Raw payload bytes (a serialized envelope in Herald).
    pub payload: Vec<u8>,
}

/// Publishing side of the bus.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so the
/// trait stays dyn-compatible (`Arc<dyn EventBus>` is passed through every
/// layer that publishes).
pub trait EventBus: Send + Sync {
    /// Publish `payload` to `topic` under `key`.
    ///
    /// Messages with the same key land on the same partition and keep their
    /// publication order.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the publish fails; the caller
    /// decides whether to retry (the relay does, with linear backoff).
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;
}

/// Consuming side of the bus: explicit receive and explicit commit.
pub trait BusConsumer: Send + Sync {
    /// Receive the next message. Awaits until one is available.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Transport`] on receive failure and
    /// [`BusError::Closed`] when the consumer has shut down.
    fn recv(&self) -> Pin<Box<dyn Future<Output = Result<BusMessage, BusError>> + Send + '_>>;

    /// Commit the message's offset, acknowledging everything up to and
    /// including it on its partition. Call only after the read-model write
    /// for the message has succeeded (or the message has been dead-lettered).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::CommitFailed`] if the commit fails. A failed
    /// commit means the message may be redelivered, which idempotent
    /// handlers absorb.
    fn commit(&self, message: &BusMessage) -> Result<(), BusError>;
}

/// The dead-letter companion of a topic, by naming convention.
#[must_use]
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}.DLT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_letter_topic_suffix() {
        assert_eq!(dead_letter_topic("herald.orchestration"), "herald.orchestration.DLT");
    }
}
