use std::time::Duration;

use tokio::time::sleep;

/// Fixed pause between consecutive external calls.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    delay: Duration,
    calls: usize,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self { delay, calls: 0 }
    }

    /// Sleeps before every call except the first.
    pub async fn wait(&mut self) {
        if self.calls > 0 && !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.calls += 1;
    }
}

/// Exponential backoff: attempt `n` (0-based retry) waits `base * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 0, base_delay: Duration::from_secs(2) }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
    }
}
