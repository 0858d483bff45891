//! Redis session registry.
//!
//! Layout:
//! - **Primary record**: `session:{connection_id}` → JSON [`SessionRecord`],
//!   TTL = 3 × heartbeat interval. A record that stops heartbeating simply
//!   vanishes.
//! - **Heartbeat index**: `sessions:index` (ZSET), member = connection id,
//!   score = last-activity epoch millis. Stale enumeration is one
//!   `ZRANGEBYSCORE`.
//! - **Recipient index**: `recipient:{id}:sessions` (SET) for lookup.
//! - **Node index**: `node:{id}:sessions` (SET) for per-node counts.
//!
//! Index sets can outlive their primary records; reads treat a missing
//! primary as a dead reference and clean it out of the sets they came from.

use herald_core::registry::{RegistryError, RegistryFuture, SessionRegistry};
use herald_core::session::SessionRecord;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

const INDEX_KEY: &str = "sessions:index";

/// TTL-based session registry in the shared Redis region.
#[derive(Clone)]
pub struct RedisSessionRegistry {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisSessionRegistry {
    /// Create a registry whose primary records live `ttl_seconds` without a
    /// heartbeat. Callers derive this from the heartbeat interval (3 × is
    /// the convention).
    #[must_use]
    pub const fn new(conn: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { conn, ttl_seconds }
    }

    fn session_key(connection_id: Uuid) -> String {
        format!("session:{connection_id}")
    }

    fn recipient_key(recipient_id: &str) -> String {
        format!("recipient:{recipient_id}:sessions")
    }

    fn node_key(node_id: &str) -> String {
        format!("node:{node_id}:sessions")
    }

    fn unavailable(e: &redis::RedisError) -> RegistryError {
        RegistryError::Unavailable(e.to_string())
    }
}

impl SessionRegistry for RedisSessionRegistry {
    fn register(&self, session: &SessionRecord) -> RegistryFuture<'_, ()> {
        let mut conn = self.conn.clone();
        let ttl = self.ttl_seconds;
        let session = session.clone();

        Box::pin(async move {
            let record = serde_json::to_string(&session)
                .map_err(|e| RegistryError::Corrupt(e.to_string()))?;
            let session_key = Self::session_key(session.connection_id);
            let recipient_key = Self::recipient_key(&session.recipient_id);
            let node_key = Self::node_key(&session.node_id);
            let member = session.connection_id.to_string();

            // One pipeline so a crash can't leave a record without its
            // indexes. Index sets get a TTL buffer past the record's.
            #[allow(clippy::cast_possible_wrap)]
            let set_ttl = (ttl + 60) as i64;
            let _: () = redis::pipe()
                .atomic()
                .set_ex(&session_key, record, ttl)
                .zadd(INDEX_KEY, &member, session.last_activity_at_epoch_milli)
                .sadd(&recipient_key, &member)
                .expire(&recipient_key, set_ttl)
                .sadd(&node_key, &member)
                .expire(&node_key, set_ttl)
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::unavailable(&e))?;

            tracing::debug!(
                connection_id = %session.connection_id,
                recipient_id = %session.recipient_id,
                node_id = %session.node_id,
                "Session registered"
            );
            Ok(())
        })
    }

    fn heartbeat(&self, node_id: &str, connection_ids: &[Uuid]) -> RegistryFuture<'_, ()> {
        let mut conn = self.conn.clone();
        let ttl = self.ttl_seconds;
        let node_key = Self::node_key(node_id);
        let ids: Vec<Uuid> = connection_ids.to_vec();

        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let now_millis = chrono::Utc::now().timestamp_millis();

            // Refresh TTLs and index scores; the JSON record's own
            // last-activity field is advisory, the ZSET score is what stale
            // eviction reads.
            let mut pipe = redis::pipe();
            #[allow(clippy::cast_possible_wrap)]
            let ttl_i = ttl as i64;
            for id in &ids {
                pipe.expire(Self::session_key(*id), ttl_i)
                    .zadd(INDEX_KEY, id.to_string(), now_millis);
            }
            pipe.expire(&node_key, ttl_i + 60);
            let _: () = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(())
        })
    }

    fn lookup(&self, recipient_id: &str) -> RegistryFuture<'_, Vec<SessionRecord>> {
        let mut conn = self.conn.clone();
        let recipient_key = Self::recipient_key(recipient_id);
        let recipient_id = recipient_id.to_string();

        Box::pin(async move {
            let members: Vec<String> = conn
                .smembers(&recipient_key)
                .await
                .map_err(|e| Self::unavailable(&e))?;

            let mut sessions = Vec::with_capacity(members.len());
            for member in members {
                let Ok(connection_id) = Uuid::parse_str(&member) else {
                    continue;
                };
                let record: Option<String> = conn
                    .get(Self::session_key(connection_id))
                    .await
                    .map_err(|e| Self::unavailable(&e))?;

                match record {
                    Some(json) => {
                        let mut session: SessionRecord = serde_json::from_str(&json)
                            .map_err(|e| RegistryError::Corrupt(e.to_string()))?;
                        // The index score is fresher than the stored record.
                        let score: Option<i64> = conn
                            .zscore(INDEX_KEY, &member)
                            .await
                            .map_err(|e| Self::unavailable(&e))?;
                        if let Some(millis) = score {
                            session.last_activity_at_epoch_milli = millis;
                        }
                        sessions.push(session);
                    }
                    None => {
                        // Dead reference: the TTL reaped the record.
                        let _: () = conn
                            .srem(&recipient_key, &member)
                            .await
                            .unwrap_or(());
                        tracing::debug!(
                            recipient_id = %recipient_id,
                            connection_id = %member,
                            "Cleaned dead session reference"
                        );
                    }
                }
            }
            Ok(sessions)
        })
    }

    fn stale_before(&self, threshold_epoch_milli: i64) -> RegistryFuture<'_, Vec<Uuid>> {
        let mut conn = self.conn.clone();

        Box::pin(async move {
            let members: Vec<String> = conn
                .zrangebyscore(INDEX_KEY, "-inf", threshold_epoch_milli - 1)
                .await
                .map_err(|e| Self::unavailable(&e))?;

            Ok(members
                .iter()
                .filter_map(|m| Uuid::parse_str(m).ok())
                .collect())
        })
    }

    fn remove(&self, connection_ids: &[Uuid]) -> RegistryFuture<'_, ()> {
        let mut conn = self.conn.clone();
        let ids: Vec<Uuid> = connection_ids.to_vec();

        Box::pin(async move {
            for id in ids {
                let member = id.to_string();
                let session_key = Self::session_key(id);

                // Fetch the record first to find its index sets; a reaped
                // record still gets its ZSET entry removed.
                let record: Option<String> = conn
                    .get(&session_key)
                    .await
                    .map_err(|e| Self::unavailable(&e))?;

                let mut pipe = redis::pipe();
                pipe.atomic().del(&session_key).zrem(INDEX_KEY, &member);
                if let Some(json) = record {
                    if let Ok(session) = serde_json::from_str::<SessionRecord>(&json) {
                        pipe.srem(Self::recipient_key(&session.recipient_id), &member)
                            .srem(Self::node_key(&session.node_id), &member);
                    }
                }
                let _: () = pipe
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| Self::unavailable(&e))?;
            }
            Ok(())
        })
    }

    fn count_by_node(&self, node_id: &str) -> RegistryFuture<'_, u64> {
        let mut conn = self.conn.clone();
        let node_key = Self::node_key(node_id);

        Box::pin(async move {
            let count: u64 = conn
                .scard(&node_key)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(count)
        })
    }

    fn count_total(&self) -> RegistryFuture<'_, u64> {
        let mut conn = self.conn.clone();

        Box::pin(async move {
            let count: u64 = conn
                .zcard(INDEX_KEY)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(count)
        })
    }
}
