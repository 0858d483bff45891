//! One live push connection.
//!
//! A connection is a bounded [`tokio::sync::mpsc`] queue of wire frames.
//! Producers enqueue without blocking beyond one flush timeout; the
//! transport (SSE handler) owns the receiving end and the connection dies
//! when either side drops.

use crate::error::PushError;
use herald_core::frame::PushFrame;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// What happened to an enqueued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The frame is in the queue.
    Sent,
    /// The frame was dropped: queue full past the flush timeout. The
    /// message is not lost: its delivery row stays `PENDING`.
    Dropped,
    /// The frame was dropped and the connection exhausted its overflow
    /// budget; the caller should force-close it.
    DroppedSlow,
}

/// A live connection's sending half plus its backpressure accounting.
pub struct PushConnection {
    /// Unique per connection; the registry key.
    pub connection_id: Uuid,
    /// The connected recipient.
    pub recipient_id: String,
    sender: mpsc::Sender<PushFrame>,
    flush_timeout: Duration,
    overflow_limit: usize,
    overflow_window: Duration,
    overflows: Mutex<VecDeque<Instant>>,
}

impl PushConnection {
    /// Create a connection with a queue of `capacity` frames. Returns the
    /// connection and the receiving end the transport drains.
    #[must_use]
    pub fn open(
        recipient_id: impl Into<String>,
        capacity: usize,
        flush_timeout: Duration,
        overflow_limit: usize,
        overflow_window: Duration,
    ) -> (Self, mpsc::Receiver<PushFrame>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                connection_id: Uuid::new_v4(),
                recipient_id: recipient_id.into(),
                sender,
                flush_timeout,
                overflow_limit,
                overflow_window,
                overflows: Mutex::new(VecDeque::new()),
            },
            receiver,
        )
    }

    /// Enqueue a frame. Non-blocking on the happy path; a full queue gets
    /// one flush-timeout's grace before the frame is dropped and counted
    /// against the overflow budget.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Closed`] when the receiving end is gone.
    pub async fn enqueue(&self, frame: PushFrame) -> Result<EnqueueOutcome, PushError> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(EnqueueOutcome::Sent),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PushError::Closed),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                match tokio::time::timeout(self.flush_timeout, self.sender.send(frame)).await {
                    Ok(Ok(())) => Ok(EnqueueOutcome::Sent),
                    Ok(Err(_)) => Err(PushError::Closed),
                    Err(_elapsed) => {
                        metrics::counter!("herald.push.dropped").increment(1);
                        if self.record_overflow() > self.overflow_limit {
                            Ok(EnqueueOutcome::DroppedSlow)
                        } else {
                            Ok(EnqueueOutcome::Dropped)
                        }
                    }
                }
            }
        }
    }

    /// Whether the client side is still attached.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Count an overflow and return how many landed inside the window.
    fn record_overflow(&self) -> usize {
        let now = Instant::now();
        // Lock poisoning cannot happen: no panics occur while held.
        let Ok(mut overflows) = self.overflows.lock() else {
            return self.overflow_limit + 1;
        };
        overflows.push_back(now);
        while let Some(front) = overflows.front() {
            if now.duration_since(*front) > self.overflow_window {
                overflows.pop_front();
            } else {
                break;
            }
        }
        overflows.len()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame() -> PushFrame {
        PushFrame::heartbeat(Utc::now())
    }

    #[tokio::test]
    async fn enqueue_preserves_order() {
        let (conn, mut rx) = PushConnection::open(
            "u1",
            8,
            Duration::from_millis(10),
            3,
            Duration::from_secs(60),
        );

        let first = PushFrame::connected(conn.connection_id, Utc::now());
        conn.enqueue(first.clone()).await.expect("enqueue");
        conn.enqueue(frame()).await.expect("enqueue");

        let got = rx.recv().await.expect("first frame");
        assert_eq!(got, first);
    }

    #[tokio::test]
    async fn full_queue_drops_after_flush_timeout() {
        let (conn, _rx) = PushConnection::open(
            "u1",
            1,
            Duration::from_millis(5),
            2,
            Duration::from_secs(60),
        );

        assert_eq!(
            conn.enqueue(frame()).await.expect("fills the queue"),
            EnqueueOutcome::Sent
        );
        // Nobody drains: the queue stays full past the flush timeout.
        assert_eq!(
            conn.enqueue(frame()).await.expect("drop"),
            EnqueueOutcome::Dropped
        );
        assert_eq!(
            conn.enqueue(frame()).await.expect("drop"),
            EnqueueOutcome::Dropped
        );
        // Third overflow in the window exceeds the budget of 2.
        assert_eq!(
            conn.enqueue(frame()).await.expect("drop slow"),
            EnqueueOutcome::DroppedSlow
        );
    }

    #[tokio::test]
    async fn closed_receiver_is_reported() {
        let (conn, rx) = PushConnection::open(
            "u1",
            1,
            Duration::from_millis(5),
            2,
            Duration::from_secs(60),
        );
        drop(rx);
        assert!(matches!(conn.enqueue(frame()).await, Err(PushError::Closed)));
        assert!(!conn.is_open());
    }
}
