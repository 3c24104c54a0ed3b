//! Pool and per-resource statistics.

use qflow_core::{ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};

/// Snapshot of a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Pool name
    pub name: String,
    /// Resource kind
    pub kind: ResourceKind,
    /// Lower bound
    pub min_size: usize,
    /// Upper bound
    pub max_size: usize,
    /// Idle, ready resources
    pub available: usize,
    /// Resources held by callers
    pub in_use: usize,
    /// Creations in flight
    pub creating: usize,
    /// Resources pulled aside for a health sweep
    pub checking: usize,
    /// Queued acquirers
    pub waiting: usize,
    /// Resources created since the pool started
    pub total_created: u64,
    /// Resources destroyed since the pool started
    pub total_destroyed: u64,
    /// Successful acquisitions
    pub total_acquisitions: u64,
    /// Acquisitions that timed out
    pub acquisition_timeouts: u64,
    /// Factory creations that failed or timed out
    pub creation_failures: u64,
    /// Whether the pool has been drained
    pub closed: bool,
}

impl PoolStats {
    /// Resources counted against `max_size`
    #[must_use]
    pub const fn total(&self) -> usize {
        self.available + self.in_use + self.creating + self.checking
    }

    /// Busy fraction of existing resources (0.0 - 1.0)
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let existing = self.available + self.in_use + self.checking;
        if existing == 0 {
            return 0.0;
        }
        self.in_use as f64 / existing as f64
    }

    /// Room left before `max_size`
    #[must_use]
    pub fn headroom(&self) -> usize {
        self.max_size.saturating_sub(self.total())
    }
}

/// Snapshot of one pooled resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    /// Resource id
    pub id: ResourceId,
    /// Whether the resource is held by a caller
    pub in_use: bool,
    /// Last health verdict
    pub healthy: bool,
    /// Failed health checks in a row
    pub consecutive_failures: u32,
    /// Last health or reset error
    pub last_error: Option<String>,
    /// Completed uses
    pub uses: u64,
    /// Rolling success rate of uses (0.0 - 1.0)
    pub success_rate: f64,
    /// Milliseconds since last use, or since creation if unused
    pub idle_ms: u64,
    /// Milliseconds since creation
    pub age_ms: u64,
}

/// Result of a health sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Resources checked
    pub checked: usize,
    /// Resources that failed this sweep
    pub failed: usize,
    /// Idle resources destroyed
    pub destroyed: usize,
    /// In-use resources marked for destruction on release
    pub doomed: usize,
}

/// Result of draining a pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Resources destroyed
    pub destroyed: usize,
    /// Of those, resources still held by callers at the deadline
    pub forced: usize,
    /// Queued acquirers turned away
    pub rejected_waiters: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(available: usize, in_use: usize) -> PoolStats {
        PoolStats {
            name: "p".to_string(),
            kind: ResourceKind::Connection,
            min_size: 0,
            max_size: 10,
            available,
            in_use,
            creating: 1,
            checking: 0,
            waiting: 0,
            total_created: 0,
            total_destroyed: 0,
            total_acquisitions: 0,
            acquisition_timeouts: 0,
            creation_failures: 0,
            closed: false,
        }
    }

    #[test]
    fn test_utilization() {
        assert_eq!(stats(0, 0).utilization(), 0.0);
        assert_eq!(stats(1, 3).utilization(), 0.75);
        assert_eq!(stats(1, 3).total(), 5);
        assert_eq!(stats(1, 3).headroom(), 5);
    }
}
