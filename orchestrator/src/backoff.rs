//! Bounded backoff for the relay and consumer loops.
//!
//! The relay backs off linearly on bus errors (attempt × base, capped); the
//! consumer's bounded retries use the same shape. Reset on success.

use std::time::Duration;

/// Linear, capped backoff with attempt tracking.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// A backoff growing by `base` per attempt, capped at `max`.
    #[must_use]
    pub const fn linear(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// The delay for the next attempt, advancing the counter.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.base.saturating_mul(self.attempt);
        delay.min(self.max)
    }

    /// Attempts taken since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Back to zero after a success.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_linearly_and_caps() {
        let mut backoff = Backoff::linear(Duration::from_millis(100), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.attempts(), 4);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
