//! In-memory session registry.

use herald_core::registry::{RegistryError, RegistryFuture, SessionRegistry};
use herald_core::session::SessionRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Map-backed registry for tests.
#[derive(Clone, Default)]
pub struct MemorySessionRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, SessionRecord>>>,
}

impl MemorySessionRegistry {
    /// A fresh, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, SessionRecord>>, RegistryError> {
        self.sessions
            .lock()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".into()))
    }
}

impl SessionRegistry for MemorySessionRegistry {
    fn register(&self, session: &SessionRecord) -> RegistryFuture<'_, ()> {
        let session = session.clone();
        Box::pin(async move {
            self.lock()?.insert(session.connection_id, session);
            Ok(())
        })
    }

    fn heartbeat(&self, _node_id: &str, connection_ids: &[Uuid]) -> RegistryFuture<'_, ()> {
        let ids: Vec<Uuid> = connection_ids.to_vec();
        Box::pin(async move {
            let now = chrono::Utc::now().timestamp_millis();
            let mut sessions = self.lock()?;
            for id in ids {
                if let Some(session) = sessions.get_mut(&id) {
                    session.last_activity_at_epoch_milli = now;
                }
            }
            Ok(())
        })
    }

    fn lookup(&self, recipient_id: &str) -> RegistryFuture<'_, Vec<SessionRecord>> {
        let recipient_id = recipient_id.to_string();
        Box::pin(async move {
            Ok(self
                .lock()?
                .values()
                .filter(|s| s.recipient_id == recipient_id)
                .cloned()
                .collect())
        })
    }

    fn stale_before(&self, threshold_epoch_milli: i64) -> RegistryFuture<'_, Vec<Uuid>> {
        Box::pin(async move {
            Ok(self
                .lock()?
                .values()
                .filter(|s| s.is_stale(threshold_epoch_milli))
                .map(|s| s.connection_id)
                .collect())
        })
    }

    fn remove(&self, connection_ids: &[Uuid]) -> RegistryFuture<'_, ()> {
        let ids: Vec<Uuid> = connection_ids.to_vec();
        Box::pin(async move {
            let mut sessions = self.lock()?;
            for id in ids {
                sessions.remove(&id);
            }
            Ok(())
        })
    }

    fn count_by_node(&self, node_id: &str) -> RegistryFuture<'_, u64> {
        let node_id = node_id.to_string();
        Box::pin(async move {
            Ok(self
                .lock()?
                .values()
                .filter(|s| s.node_id == node_id)
                .count() as u64)
        })
    }

    fn count_total(&self) -> RegistryFuture<'_, u64> {
        Box::pin(async move { Ok(self.lock()?.len() as u64) })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn lookup_and_stale_sweep() {
        let registry = MemorySessionRegistry::new();
        let now = Utc::now();

        let mut fresh = SessionRecord::open("u1", Uuid::new_v4(), "node-a", "c", now);
        let mut stale = SessionRecord::open("u1", Uuid::new_v4(), "node-b", "c", now);
        stale.last_activity_at_epoch_milli = now.timestamp_millis() - 120_000;
        fresh.last_activity_at_epoch_milli = now.timestamp_millis();

        registry.register(&fresh).await.expect("register");
        registry.register(&stale).await.expect("register");

        assert_eq!(registry.lookup("u1").await.expect("lookup").len(), 2);
        assert_eq!(registry.count_by_node("node-a").await.expect("count"), 1);
        assert_eq!(registry.count_total().await.expect("count"), 2);

        let stale_ids = registry
            .stale_before(now.timestamp_millis() - 90_000)
            .await
            .expect("stale");
        assert_eq!(stale_ids, vec![stale.connection_id]);

        registry.remove(&stale_ids).await.expect("remove");
        assert_eq!(registry.lookup("u1").await.expect("lookup").len(), 1);
    }
}
