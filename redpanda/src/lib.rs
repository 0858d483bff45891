//! Redpanda/Kafka event bus adapter for Herald.
//!
//! Implements the [`EventBus`] and [`BusConsumer`] traits from
//! `herald-core` over rdkafka.
//!
//! # Why Redpanda?
//!
//! - **Kafka-compatible**: standard Kafka protocol, works with any
//!   Kafka-compatible system (Redpanda, Apache Kafka, AWS MSK, ...)
//! - **Simpler operations**: easier to deploy and operate than Kafka
//! - **Self-hostable**: Docker, Kubernetes, bare metal
//!
//! # Delivery semantics
//!
//! **At-least-once** with manual offset commits:
//! - The consumer owns its commits: [`BusConsumer::commit`] is called by the
//!   processing loop only after the read-model write (or dead-lettering)
//!   succeeded. A crash between processing and commit redelivers the
//!   message; Herald's consumers are idempotent by event id.
//! - Every publish carries an explicit partition key (the aggregate id),
//!   so one recipient's events share a partition and keep their order.
//!
//! # Example
//!
//! ```no_run
//! use herald_redpanda::KafkaEventBus;
//! use herald_core::bus::EventBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = KafkaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .build()?;
//! bus.publish("herald.orchestration", "user-1", b"{}").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use herald_core::bus::{BusConsumer, BusError, BusMessage, EventBus};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Kafka-protocol producer side of the Herald bus.
pub struct KafkaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
}

impl KafkaEventBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created (bad broker list, invalid config).
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the bus.
    #[must_use]
    pub fn builder() -> KafkaEventBusBuilder {
        KafkaEventBusBuilder::default()
    }

    /// The configured broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`KafkaEventBus`].
#[derive(Default)]
pub struct KafkaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl KafkaEventBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"`, or `"all"`.
    /// Default: `"all"`; an outbox row is only deleted after the bus has
    /// durably accepted its event.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`,
    /// `"zstd"`. Default: `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`KafkaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<KafkaEventBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("all"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("all"),
            compression = self.compression.as_deref().unwrap_or("none"),
            "KafkaEventBus created"
        );

        Ok(KafkaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

impl EventBus for KafkaEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        // Clone data before moving into the async block.
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition = partition,
                        offset = offset,
                        "Event published"
                    );
                    metrics::counter!("herald.bus.published", "topic" => topic).increment(1);
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(BusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }
}

/// Kafka-protocol consumer side of the Herald bus.
///
/// One instance per consumer group per node. Offsets are committed
/// explicitly via [`BusConsumer::commit`]; auto-commit is disabled.
pub struct KafkaBusConsumer {
    consumer: StreamConsumer,
    group: String,
}

impl KafkaBusConsumer {
    /// Subscribe `group` to `topics`.
    ///
    /// New groups start from the earliest offset: a node joining the
    /// cluster must see pending push work items, not just future ones.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the consumer cannot be
    /// created or the subscription is rejected.
    pub fn subscribe(brokers: &str, group: &str, topics: &[&str]) -> Result<Self, BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BusError::SubscriptionFailed {
                topics: topics.iter().map(ToString::to_string).collect(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(topics)
            .map_err(|e| BusError::SubscriptionFailed {
                topics: topics.iter().map(ToString::to_string).collect(),
                reason: format!("Failed to subscribe: {e}"),
            })?;

        tracing::info!(
            topics = ?topics,
            consumer_group = group,
            manual_commit = true,
            "Subscribed to topics"
        );

        Ok(Self {
            consumer,
            group: group.to_string(),
        })
    }
}

impl BusConsumer for KafkaBusConsumer {
    fn recv(&self) -> Pin<Box<dyn Future<Output = Result<BusMessage, BusError>> + Send + '_>> {
        Box::pin(async move {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(|e| BusError::Transport(format!("Failed to receive message: {e}")))?;

            let payload = message.payload().unwrap_or_default().to_vec();
            let key = message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned());

            tracing::trace!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                consumer_group = %self.group,
                "Received message"
            );

            Ok(BusMessage {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key,
                payload,
            })
        })
    }

    fn commit(&self, message: &BusMessage) -> Result<(), BusError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| BusError::CommitFailed(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| BusError::CommitFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaEventBus>();
        assert_sync::<KafkaEventBus>();
        assert_send::<KafkaBusConsumer>();
        assert_sync::<KafkaBusConsumer>();
    }

    #[test]
    fn builder_requires_brokers() {
        assert!(KafkaEventBus::builder().build().is_err());
    }
}
