//! In-memory failure-injection flags.

use herald_core::fault::{FaultError, FaultFlags, FaultFuture};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    armed: bool,
    failing: HashSet<Uuid>,
}

/// Process-local fault flags with the same consume-once semantics as the
/// Redis implementation.
#[derive(Clone, Default)]
pub struct MemoryFaultFlags {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryFaultFlags {
    /// A fresh, disarmed flag store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, FaultError> {
        self.inner
            .lock()
            .map_err(|_| FaultError::Unavailable("flags lock poisoned".into()))
    }
}

impl FaultFlags for MemoryFaultFlags {
    fn arm(&self) -> FaultFuture<'_, ()> {
        Box::pin(async move {
            self.lock()?.armed = true;
            Ok(())
        })
    }

    fn disarm(&self) -> FaultFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.armed = false;
            inner.failing.clear();
            Ok(())
        })
    }

    fn consume_armed(&self) -> FaultFuture<'_, bool> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            let was_armed = inner.armed;
            inner.armed = false;
            Ok(was_armed)
        })
    }

    fn is_armed(&self) -> FaultFuture<'_, bool> {
        Box::pin(async move { Ok(self.lock()?.armed) })
    }

    fn mark_failing(&self, broadcast_id: Uuid) -> FaultFuture<'_, ()> {
        Box::pin(async move {
            self.lock()?.failing.insert(broadcast_id);
            Ok(())
        })
    }

    fn is_failing(&self, broadcast_id: Uuid) -> FaultFuture<'_, bool> {
        Box::pin(async move { Ok(self.lock()?.failing.contains(&broadcast_id)) })
    }

    fn clear_failing(&self, broadcast_id: Uuid) -> FaultFuture<'_, ()> {
        Box::pin(async move {
            self.lock()?.failing.remove(&broadcast_id);
            Ok(())
        })
    }

    fn failing(&self) -> FaultFuture<'_, Vec<Uuid>> {
        Box::pin(async move { Ok(self.lock()?.failing.iter().copied().collect()) })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn armed_flag_consumed_once() {
        let flags = MemoryFaultFlags::new();
        flags.arm().await.expect("arm");
        assert!(flags.is_armed().await.expect("armed"));

        assert!(flags.consume_armed().await.expect("consume"));
        assert!(!flags.consume_armed().await.expect("consume again"));
        assert!(!flags.is_armed().await.expect("armed"));
    }
}
