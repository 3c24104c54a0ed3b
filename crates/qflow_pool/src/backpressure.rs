//! Backpressure on the acquisition wait queue.
//!
//! When every resource is busy and the pool is at capacity, acquirers queue
//! up. The controller caps that queue and decides what happens to callers
//! that arrive while it is full.

use serde::{Deserialize, Serialize};

/// What to do with an acquirer when the wait queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureStrategy {
    /// Wait for room in the queue, bounded by the acquisition timeout
    #[default]
    Block,
    /// Fail immediately
    Reject,
}

/// Backpressure status for one acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureStatus {
    /// The caller may join the queue
    Ok,
    /// The caller should wait for room in the queue
    Block,
    /// The caller should be turned away
    Reject,
}

/// Backpressure controller
///
/// Stateless apart from its limits: the pool passes in the current queue
/// depth on each decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureController {
    /// Maximum number of queued acquirers; zero disables the limit
    pub max_waiters: usize,
    /// Strategy once the limit is reached
    pub strategy: BackpressureStrategy,
}

impl BackpressureController {
    /// Create a controller
    #[must_use]
    pub const fn new(max_waiters: usize, strategy: BackpressureStrategy) -> Self {
        Self {
            max_waiters,
            strategy,
        }
    }

    /// Whether a queue of `waiters` is at the limit
    #[must_use]
    pub fn should_apply(&self, waiters: usize) -> bool {
        self.max_waiters != 0 && waiters >= self.max_waiters
    }

    /// Decide what to do with one more acquirer
    #[must_use]
    pub fn status(&self, waiters: usize) -> BackpressureStatus {
        if !self.should_apply(waiters) {
            return BackpressureStatus::Ok;
        }
        match self.strategy {
            BackpressureStrategy::Block => BackpressureStatus::Block,
            BackpressureStrategy::Reject => BackpressureStatus::Reject,
        }
    }

    /// Queue fill ratio (0.0 - 1.0)
    #[must_use]
    pub fn fill_ratio(&self, waiters: usize) -> f64 {
        if self.max_waiters == 0 {
            return 0.0;
        }
        (waiters as f64 / self.max_waiters as f64).min(1.0)
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self {
            max_waiters: 1000,
            strategy: BackpressureStrategy::Block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backpressure_should_apply() {
        let controller = BackpressureController::new(10, BackpressureStrategy::Block);
        assert!(!controller.should_apply(5));
        assert!(controller.should_apply(10));
    }

    #[test]
    fn test_backpressure_status() {
        let reject = BackpressureController::new(2, BackpressureStrategy::Reject);
        assert_eq!(reject.status(1), BackpressureStatus::Ok);
        assert_eq!(reject.status(2), BackpressureStatus::Reject);

        let block = BackpressureController::new(2, BackpressureStrategy::Block);
        assert_eq!(block.status(3), BackpressureStatus::Block);
    }

    #[test]
    fn test_unlimited_queue() {
        let controller = BackpressureController::new(0, BackpressureStrategy::Reject);
        assert_eq!(controller.status(usize::MAX), BackpressureStatus::Ok);
        assert_eq!(controller.fill_ratio(50), 0.0);
    }

    #[test]
    fn test_backpressure_fill_ratio() {
        let controller = BackpressureController::new(100, BackpressureStrategy::Block);
        assert_eq!(controller.fill_ratio(50), 0.5);
        assert_eq!(controller.fill_ratio(150), 1.0);
    }

    #[test]
    fn test_backpressure_default() {
        let controller = BackpressureController::default();
        assert_eq!(controller.max_waiters, 1000);
        assert_eq!(controller.strategy, BackpressureStrategy::Block);
    }
}
