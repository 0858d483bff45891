//! Shared inbox cache.
//!
//! One snapshot per recipient: `inbox:{recipient_id}` → JSON array of
//! [`InboxEntry`], newest first, plus a key set `inbox:keys` the cleaner
//! shuffles to pick eviction victims. Snapshots carry a TTL as a second
//! line of defense; the cleaner enforces the configured bound.
//!
//! Updates are read-modify-write on the recipient's key. Conflicts are
//! bounded to that key, and the snapshot is only a cache: the delivery
//! rows stay authoritative, and the next miss refills.

use herald_core::delivery::{DeliveryStatus, ReadStatus};
use herald_core::inbox::{InboxCache, InboxCacheError, InboxCacheFuture, InboxEntry};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

const KEYS_KEY: &str = "inbox:keys";

/// Write-through inbox snapshots in the shared Redis region.
#[derive(Clone)]
pub struct RedisInboxCache {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisInboxCache {
    /// Create a cache whose snapshots expire after `ttl_seconds` without a
    /// refresh.
    #[must_use]
    pub const fn new(conn: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { conn, ttl_seconds }
    }

    fn inbox_key(recipient_id: &str) -> String {
        format!("inbox:{recipient_id}")
    }

    fn unavailable(e: &redis::RedisError) -> InboxCacheError {
        InboxCacheError::Unavailable(e.to_string())
    }

    async fn read_entries(
        conn: &mut ConnectionManager,
        recipient_id: &str,
    ) -> Result<Option<Vec<InboxEntry>>, InboxCacheError> {
        let json: Option<String> = conn
            .get(Self::inbox_key(recipient_id))
            .await
            .map_err(|e| Self::unavailable(&e))?;

        json.map(|j| serde_json::from_str(&j).map_err(|e| InboxCacheError::Corrupt(e.to_string())))
            .transpose()
    }

    async fn write_entries(
        conn: &mut ConnectionManager,
        recipient_id: &str,
        entries: &[InboxEntry],
        ttl_seconds: u64,
    ) -> Result<(), InboxCacheError> {
        let json =
            serde_json::to_string(entries).map_err(|e| InboxCacheError::Corrupt(e.to_string()))?;
        let _: () = redis::pipe()
            .atomic()
            .set_ex(Self::inbox_key(recipient_id), json, ttl_seconds)
            .sadd(KEYS_KEY, recipient_id)
            .query_async(conn)
            .await
            .map_err(|e| Self::unavailable(&e))?;
        Ok(())
    }
}

impl InboxCache for RedisInboxCache {
    fn entries(&self, recipient_id: &str) -> InboxCacheFuture<'_, Option<Vec<InboxEntry>>> {
        let mut conn = self.conn.clone();
        let recipient_id = recipient_id.to_string();

        Box::pin(async move { Self::read_entries(&mut conn, &recipient_id).await })
    }

    fn fill(&self, recipient_id: &str, entries: &[InboxEntry]) -> InboxCacheFuture<'_, ()> {
        let mut conn = self.conn.clone();
        let recipient_id = recipient_id.to_string();
        let entries = entries.to_vec();
        let ttl = self.ttl_seconds;

        Box::pin(async move { Self::write_entries(&mut conn, &recipient_id, &entries, ttl).await })
    }

    fn update_status(
        &self,
        recipient_id: &str,
        broadcast_id: Uuid,
        delivery_status: DeliveryStatus,
        read_status: ReadStatus,
    ) -> InboxCacheFuture<'_, ()> {
        let mut conn = self.conn.clone();
        let recipient_id = recipient_id.to_string();
        let ttl = self.ttl_seconds;

        Box::pin(async move {
            let Some(mut entries) = Self::read_entries(&mut conn, &recipient_id).await? else {
                return Ok(());
            };
            let mut changed = false;
            for entry in &mut entries {
                if entry.broadcast_id == broadcast_id {
                    entry.delivery_status = delivery_status;
                    entry.read_status = read_status;
                    changed = true;
                }
            }
            if changed {
                Self::write_entries(&mut conn, &recipient_id, &entries, ttl).await?;
            }
            Ok(())
        })
    }

    fn remove_broadcast(&self, recipient_id: &str, broadcast_id: Uuid) -> InboxCacheFuture<'_, ()> {
        let mut conn = self.conn.clone();
        let recipient_id = recipient_id.to_string();
        let ttl = self.ttl_seconds;

        Box::pin(async move {
            let Some(mut entries) = Self::read_entries(&mut conn, &recipient_id).await? else {
                return Ok(());
            };
            let before = entries.len();
            entries.retain(|e| e.broadcast_id != broadcast_id);
            if entries.len() != before {
                Self::write_entries(&mut conn, &recipient_id, &entries, ttl).await?;
            }
            Ok(())
        })
    }

    fn count(&self) -> InboxCacheFuture<'_, u64> {
        let mut conn = self.conn.clone();

        Box::pin(async move {
            let count: u64 = conn
                .scard(KEYS_KEY)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(count)
        })
    }

    fn keys(&self) -> InboxCacheFuture<'_, Vec<String>> {
        let mut conn = self.conn.clone();

        Box::pin(async move {
            let keys: Vec<String> = conn
                .smembers(KEYS_KEY)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(keys)
        })
    }

    fn evict(&self, recipient_ids: &[String]) -> InboxCacheFuture<'_, ()> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = recipient_ids.to_vec();

        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut pipe = redis::pipe();
            pipe.atomic();
            for id in &ids {
                pipe.del(Self::inbox_key(id)).srem(KEYS_KEY, id);
            }
            let _: () = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::unavailable(&e))?;

            tracing::debug!(evicted = ids.len(), "Inbox snapshots evicted");
            Ok(())
        })
    }
}
