//! In-memory inbox cache.

use herald_core::delivery::{DeliveryStatus, ReadStatus};
use herald_core::inbox::{InboxCache, InboxCacheError, InboxCacheFuture, InboxEntry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Map-backed inbox cache for tests.
#[derive(Clone, Default)]
pub struct MemoryInboxCache {
    snapshots: Arc<Mutex<HashMap<String, Vec<InboxEntry>>>>,
}

impl MemoryInboxCache {
    /// A fresh, empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<InboxEntry>>>, InboxCacheError> {
        self.snapshots
            .lock()
            .map_err(|_| InboxCacheError::Unavailable("cache lock poisoned".into()))
    }
}

impl InboxCache for MemoryInboxCache {
    fn entries(&self, recipient_id: &str) -> InboxCacheFuture<'_, Option<Vec<InboxEntry>>> {
        let recipient_id = recipient_id.to_string();
        Box::pin(async move { Ok(self.lock()?.get(&recipient_id).cloned()) })
    }

    fn fill(&self, recipient_id: &str, entries: &[InboxEntry]) -> InboxCacheFuture<'_, ()> {
        let recipient_id = recipient_id.to_string();
        let entries = entries.to_vec();
        Box::pin(async move {
            self.lock()?.insert(recipient_id, entries);
            Ok(())
        })
    }

    fn update_status(
        &self,
        recipient_id: &str,
        broadcast_id: Uuid,
        delivery_status: DeliveryStatus,
        read_status: ReadStatus,
    ) -> InboxCacheFuture<'_, ()> {
        let recipient_id = recipient_id.to_string();
        Box::pin(async move {
            if let Some(entries) = self.lock()?.get_mut(&recipient_id) {
                for entry in entries.iter_mut().filter(|e| e.broadcast_id == broadcast_id) {
                    entry.delivery_status = delivery_status;
                    entry.read_status = read_status;
                }
            }
            Ok(())
        })
    }

    fn remove_broadcast(&self, recipient_id: &str, broadcast_id: Uuid) -> InboxCacheFuture<'_, ()> {
        let recipient_id = recipient_id.to_string();
        Box::pin(async move {
            if let Some(entries) = self.lock()?.get_mut(&recipient_id) {
                entries.retain(|e| e.broadcast_id != broadcast_id);
            }
            Ok(())
        })
    }

    fn count(&self) -> InboxCacheFuture<'_, u64> {
        Box::pin(async move { Ok(self.lock()?.len() as u64) })
    }

    fn keys(&self) -> InboxCacheFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.lock()?.keys().cloned().collect()) })
    }

    fn evict(&self, recipient_ids: &[String]) -> InboxCacheFuture<'_, ()> {
        let ids: Vec<String> = recipient_ids.to_vec();
        Box::pin(async move {
            let mut snapshots = self.lock()?;
            for id in ids {
                snapshots.remove(&id);
            }
            Ok(())
        })
    }
}
