//! Failure-injection flags in the shared Redis region.
//!
//! `fault:armed` is consumed with `GETDEL` so exactly one broadcast creation
//! observes it, no matter how many nodes race. `fault:broadcasts` holds the
//! ids whose consumer-side processing must fail.

use herald_core::fault::{FaultError, FaultFlags, FaultFuture};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

const ARMED_KEY: &str = "fault:armed";
const FAILING_KEY: &str = "fault:broadcasts";

/// Cluster-visible failure-injection flags.
#[derive(Clone)]
pub struct RedisFaultFlags {
    conn: ConnectionManager,
}

impl RedisFaultFlags {
    /// Create a flag store over the shared region.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn unavailable(e: &redis::RedisError) -> FaultError {
        FaultError::Unavailable(e.to_string())
    }
}

impl FaultFlags for RedisFaultFlags {
    fn arm(&self) -> FaultFuture<'_, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let _: () = conn
                .set(ARMED_KEY, "1")
                .await
                .map_err(|e| Self::unavailable(&e))?;
            tracing::info!("Failure injection armed for next broadcast");
            Ok(())
        })
    }

    fn disarm(&self) -> FaultFuture<'_, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let _: () = redis::pipe()
                .atomic()
                .del(ARMED_KEY)
                .del(FAILING_KEY)
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            tracing::info!("Failure injection disarmed");
            Ok(())
        })
    }

    fn consume_armed(&self) -> FaultFuture<'_, bool> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            // GETDEL: exactly one caller sees the value.
            let value: Option<String> = redis::cmd("GETDEL")
                .arg(ARMED_KEY)
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(value.is_some())
        })
    }

    fn is_armed(&self) -> FaultFuture<'_, bool> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let exists: bool = conn
                .exists(ARMED_KEY)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(exists)
        })
    }

    fn mark_failing(&self, broadcast_id: Uuid) -> FaultFuture<'_, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let _: () = conn
                .sadd(FAILING_KEY, broadcast_id.to_string())
                .await
                .map_err(|e| Self::unavailable(&e))?;
            tracing::info!(broadcast_id = %broadcast_id, "Broadcast marked for consumer failure");
            Ok(())
        })
    }

    fn is_failing(&self, broadcast_id: Uuid) -> FaultFuture<'_, bool> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let member: bool = conn
                .sismember(FAILING_KEY, broadcast_id.to_string())
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(member)
        })
    }

    fn clear_failing(&self, broadcast_id: Uuid) -> FaultFuture<'_, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let _: () = conn
                .srem(FAILING_KEY, broadcast_id.to_string())
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(())
        })
    }

    fn failing(&self) -> FaultFuture<'_, Vec<Uuid>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let members: Vec<String> = conn
                .smembers(FAILING_KEY)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(members
                .iter()
                .filter_map(|m| Uuid::parse_str(m).ok())
                .collect())
        })
    }
}
