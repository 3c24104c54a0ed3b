//! Step retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff between attempts of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Ceiling on any delay
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// No retries
    pub const NONE: Self = Self {
        retries: 0,
        base_delay_ms: 0,
        max_delay_ms: 0,
    };

    /// Attempts in total
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Delay after failed attempt `attempt` (1-based): the base delay
    /// doubled per earlier retry, capped at `max_delay_ms`
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_with_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 3);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(5), Duration::from_secs(10));
        assert_eq!(policy.delay(60), Duration::from_secs(10));
        assert_eq!(RetryPolicy::NONE.attempts(), 1);
    }
}
