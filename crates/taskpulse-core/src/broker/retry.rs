//! Retry policy: decides backoff delays for redelivery and resend.

use std::time::Duration;

/// Exponential backoff policy.
///
/// Shared by the outbox sender (broker publish retries) and the broker's
/// nack redelivery scheduling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// With base=2s, multiplier=2.0: 2s, 4s, 8s, 16s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }

    /// Short delays for tests and the demo binary.
    pub fn fast() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}
