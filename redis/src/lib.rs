//! Redis-backed shared distributed region for Herald.
//!
//! Three concerns live here, all cluster-visible:
//!
//! - [`RedisSessionRegistry`]: recipient → {node, connection} with TTL'd
//!   primary records and a heartbeat-scored sorted index, so stale
//!   enumeration is `O(log n + k)`.
//! - [`RedisInboxCache`]: bounded per-recipient inbox snapshots,
//!   write-through of the delivery rows, randomly evicted by the cleaner.
//! - [`RedisFaultFlags`]: failure-injection flags consumed atomically, so
//!   tests can force the dead-letter path from any node.
//!
//! All three are best-effort layers over durable Postgres state: losing a
//! Redis key degrades a live push to a pull-on-reconnect, never loses a
//! message.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod flags;
pub mod inbox;
pub mod registry;

pub use flags::RedisFaultFlags;
pub use inbox::RedisInboxCache;
pub use registry::RedisSessionRegistry;

use herald_core::registry::RegistryError;
use redis::aio::ConnectionManager;
use redis::Client;

/// Open a pooled connection manager against the shared region.
///
/// # Errors
///
/// Returns [`RegistryError::Unavailable`] if the connection cannot be
/// established.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, RegistryError> {
    let client = Client::open(redis_url)
        .map_err(|e| RegistryError::Unavailable(format!("Failed to create Redis client: {e}")))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| RegistryError::Unavailable(format!("Failed to connect to Redis: {e}")))
}
