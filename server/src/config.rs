//! Configuration, loaded from environment variables with production
//! defaults. Every knob the pipeline exposes is enumerated here; nothing
//! reads the environment anywhere else.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use uuid::Uuid;

/// Full node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `PostgreSQL` (broadcasts, deliveries, outbox, statistics, DLT).
    pub postgres: PostgresConfig,
    /// Redis (session registry, inbox cache, fault flags).
    pub redis: RedisConfig,
    /// Kafka-protocol bus.
    pub kafka: KafkaConfig,
    /// HTTP server.
    pub server: ServerConfig,
    /// This node's identity.
    pub node: NodeConfig,
    /// Outbox relay.
    pub relay: RelayConfig,
    /// Orchestration consumer.
    pub consumer: ConsumerConfig,
    /// Push-session layer.
    pub push: PushConfig,
    /// Lifecycle scheduler.
    pub scheduler: SchedulerConfig,
    /// External recipient directory.
    pub directory: DirectoryConfig,
}

/// `PostgreSQL` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Connection URL.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
}

/// Redis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL.
    pub url: String,
    /// Inbox snapshot TTL in seconds.
    pub inbox_ttl_secs: u64,
}

/// Bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap broker list, comma-separated.
    pub brokers: String,
    /// The orchestration topic (its `.DLT` companion is derived).
    pub topic: String,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

/// Node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique per node; also names the per-node consumer group.
    pub node_id: String,
    /// Cluster label carried in session records.
    pub cluster_id: String,
}

/// Outbox relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Rows drained per transaction.
    pub batch_size: i64,
    /// Sleep between drain ticks when the outbox is empty (milliseconds).
    pub drain_interval_ms: u64,
}

/// Consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Bounded retries before dead-lettering.
    pub max_retries: u32,
    /// Per-message processing deadline (seconds).
    pub processing_deadline_secs: u64,
    /// Targeting insert batch size.
    pub targeting_batch_size: usize,
}

/// Push-session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Flush grace for a saturated queue (milliseconds).
    pub flush_timeout_ms: u64,
    /// Overflows tolerated inside the window before force-close.
    pub overflow_limit: usize,
    /// Rolling overflow window (seconds).
    pub overflow_window_secs: u64,
    /// Heartbeat cadence (seconds).
    pub heartbeat_secs: u64,
    /// Shutdown drain grace (seconds).
    pub drain_grace_secs: u64,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Lifecycle tick (seconds).
    pub tick_secs: u64,
    /// Activation prefetch window (seconds).
    pub prefetch_window_secs: u64,
    /// Session staleness threshold (seconds).
    pub session_stale_secs: u64,
    /// Inbox cleanup tick (seconds).
    pub inbox_cleanup_tick_secs: u64,
    /// Cached inbox snapshot bound.
    pub inbox_cache_threshold: u64,
    /// Disconnected-session retention (seconds).
    pub session_retention_secs: u64,
    /// Dead-letter retention (seconds).
    pub dlt_retention_secs: u64,
}

/// Recipient directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the directory service.
    pub url: String,
}

impl Config {
    /// Load from the environment, falling back to defaults suitable for
    /// local development.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            postgres: PostgresConfig {
                url: env_or("HERALD_DATABASE_URL", "postgres://localhost:5432/herald"),
                max_connections: parse_or("HERALD_DATABASE_MAX_CONNECTIONS", 10),
            },
            redis: RedisConfig {
                url: env_or("HERALD_REDIS_URL", "redis://127.0.0.1:6379"),
                inbox_ttl_secs: parse_or("HERALD_INBOX_CACHE_TTL_SECS", 86_400),
            },
            kafka: KafkaConfig {
                brokers: env_or("HERALD_KAFKA_BROKERS", "localhost:9092"),
                topic: env_or("HERALD_TOPIC", "herald.orchestration"),
            },
            server: ServerConfig {
                host: env_or("HERALD_HTTP_HOST", "0.0.0.0"),
                port: parse_or("HERALD_HTTP_PORT", 8080),
            },
            node: NodeConfig {
                node_id: env::var("HERALD_NODE_ID")
                    .unwrap_or_else(|_| format!("node-{}", &Uuid::new_v4().to_string()[..8])),
                cluster_id: env_or("HERALD_CLUSTER_ID", "herald"),
            },
            relay: RelayConfig {
                batch_size: parse_or("HERALD_OUTBOX_BATCH_SIZE", 100),
                drain_interval_ms: parse_or("HERALD_OUTBOX_DRAIN_INTERVAL_MS", 1_000),
            },
            consumer: ConsumerConfig {
                max_retries: parse_or("HERALD_CONSUMER_MAX_RETRIES", 3),
                processing_deadline_secs: parse_or("HERALD_PROCESSING_DEADLINE_SECS", 30),
                targeting_batch_size: parse_or("HERALD_TARGETING_BATCH_SIZE", 500),
            },
            push: PushConfig {
                queue_capacity: parse_or("HERALD_PUSH_QUEUE_CAPACITY", 256),
                flush_timeout_ms: parse_or("HERALD_PUSH_FLUSH_TIMEOUT_MS", 2_000),
                overflow_limit: parse_or("HERALD_PUSH_OVERFLOW_LIMIT", 5),
                overflow_window_secs: parse_or("HERALD_PUSH_OVERFLOW_WINDOW_SECS", 60),
                heartbeat_secs: parse_or("HERALD_SESSION_HEARTBEAT_SECS", 30),
                drain_grace_secs: parse_or("HERALD_PUSH_DRAIN_GRACE_SECS", 10),
            },
            scheduler: SchedulerConfig {
                tick_secs: parse_or("HERALD_SCHEDULER_TICK_SECS", 60),
                prefetch_window_secs: parse_or("HERALD_SCHEDULER_PREFETCH_SECS", 1_800),
                session_stale_secs: parse_or("HERALD_SESSION_STALE_SECS", 90),
                inbox_cleanup_tick_secs: parse_or("HERALD_INBOX_CLEANUP_TICK_SECS", 300),
                inbox_cache_threshold: parse_or("HERALD_INBOX_CACHE_THRESHOLD", 10_000),
                session_retention_secs: parse_or("HERALD_SESSION_RETENTION_SECS", 259_200),
                dlt_retention_secs: parse_or("HERALD_DLT_RETENTION_SECS", 604_800),
            },
            directory: DirectoryConfig {
                url: env_or("HERALD_DIRECTORY_URL", "http://localhost:8081"),
            },
        }
    }

    /// The per-node push consumer group.
    #[must_use]
    pub fn push_group(&self) -> String {
        format!("herald-push-{}", self.node.node_id)
    }

    /// Registry record TTL: three missed heartbeats.
    #[must_use]
    pub const fn registry_ttl_secs(&self) -> u64 {
        self.push.heartbeat_secs * 3
    }

    /// The heartbeat cadence as a [`Duration`].
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.push.heartbeat_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_enumerated_knobs() {
        let config = Config::from_env();
        assert_eq!(config.relay.batch_size, 100);
        assert_eq!(config.scheduler.tick_secs, 60);
        assert_eq!(config.scheduler.prefetch_window_secs, 1_800);
        assert_eq!(config.push.heartbeat_secs, 30);
        assert_eq!(config.scheduler.session_stale_secs, 90);
        assert_eq!(config.registry_ttl_secs(), 90);
        assert!(config.push_group().starts_with("herald-push-"));
    }
}
