//! In-memory bus: per-topic logs with consumer-group cursors.
//!
//! Faithful where it matters: messages keep publication order per topic
//! (and therefore per key), every group sees every message once, and
//! separate groups consume independently. Cut corners tests don't observe:
//! one partition per topic, commits are recorded but uncommitted messages
//! are not redelivered.

use herald_core::bus::{BusConsumer, BusError, BusMessage, EventBus};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    /// topic → append-only log of (key, payload).
    logs: HashMap<String, Vec<(Option<String>, Vec<u8>)>>,
    /// (group, topic) → next undelivered index.
    cursors: HashMap<(String, String), usize>,
    /// (group, topic) → committed offset + 1.
    commits: HashMap<(String, String), usize>,
}

/// Shared in-memory bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryBus {
    /// A fresh, empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a consumer in `group` over `topics`.
    #[must_use]
    pub fn consumer(&self, group: &str, topics: &[&str]) -> MemoryBusConsumer {
        MemoryBusConsumer {
            inner: Arc::clone(&self.inner),
            notify: Arc::clone(&self.notify),
            group: group.to_string(),
            topics: topics.iter().map(ToString::to_string).collect(),
        }
    }

    /// Everything published to `topic`, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (a test already panicked).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn published(&self, topic: &str) -> Vec<(Option<String>, Vec<u8>)> {
        self.inner
            .lock()
            .unwrap()
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }
}

impl EventBus for MemoryBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            {
                let mut inner = self
                    .inner
                    .lock()
                    .map_err(|_| BusError::Transport("bus lock poisoned".into()))?;
                inner
                    .logs
                    .entry(topic)
                    .or_default()
                    .push((Some(key), payload));
            }
            self.notify.notify_waiters();
            Ok(())
        })
    }
}

/// One consumer-group member over the in-memory bus.
pub struct MemoryBusConsumer {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    group: String,
    topics: Vec<String>,
}

impl MemoryBusConsumer {
    fn try_next(&self) -> Result<Option<BusMessage>, BusError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| BusError::Transport("bus lock poisoned".into()))?;

        for topic in &self.topics {
            let cursor_key = (self.group.clone(), topic.clone());
            let cursor = inner.cursors.get(&cursor_key).copied().unwrap_or(0);
            let Some((key, payload)) = inner.logs.get(topic).and_then(|log| log.get(cursor)) else {
                continue;
            };
            let message = BusMessage {
                topic: topic.clone(),
                partition: 0,
                #[allow(clippy::cast_possible_wrap)]
                offset: cursor as i64,
                key: key.clone(),
                payload: payload.clone(),
            };
            inner.cursors.insert(cursor_key, cursor + 1);
            return Ok(Some(message));
        }
        Ok(None)
    }
}

impl BusConsumer for MemoryBusConsumer {
    fn recv(&self) -> Pin<Box<dyn Future<Output = Result<BusMessage, BusError>> + Send + '_>> {
        Box::pin(async move {
            loop {
                if let Some(message) = self.try_next()? {
                    return Ok(message);
                }
                // Race-safe enough for tests: re-check after notification
                // or a short nap.
                let notified = self.notify.notified();
                tokio::select! {
                    () = notified => {}
                    () = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
                }
            }
        })
    }

    fn commit(&self, message: &BusMessage) -> Result<(), BusError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| BusError::CommitFailed("bus lock poisoned".into()))?;
        let committed = usize::try_from(message.offset)
            .map_err(|_| BusError::CommitFailed("negative offset".into()))?
            + 1;
        inner
            .commits
            .insert((self.group.clone(), message.topic.clone()), committed);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn groups_consume_independently() {
        let bus = MemoryBus::new();
        bus.publish("t", "k1", b"a").await.expect("publish");
        bus.publish("t", "k2", b"b").await.expect("publish");

        let one = bus.consumer("group-one", &["t"]);
        let two = bus.consumer("group-two", &["t"]);

        let m1 = one.recv().await.expect("recv");
        assert_eq!(m1.payload, b"a");
        one.commit(&m1).expect("commit");

        // The second group still sees the first message.
        let m2 = two.recv().await.expect("recv");
        assert_eq!(m2.payload, b"a");
        assert_eq!(m2.key.as_deref(), Some("k1"));

        let m3 = one.recv().await.expect("recv");
        assert_eq!(m3.payload, b"b");
        assert_eq!(m3.offset, 1);
    }

    #[tokio::test]
    async fn recv_wakes_on_late_publish() {
        let bus = MemoryBus::new();
        let consumer = bus.consumer("g", &["t"]);

        let bus_clone = bus.clone();
        let publisher = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            bus_clone.publish("t", "k", b"late").await
        });

        let message = consumer.recv().await.expect("recv");
        assert_eq!(message.payload, b"late");
        publisher.await.expect("join").expect("publish");
    }
}
