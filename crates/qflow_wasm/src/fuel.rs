//! Fuel accounting across invocations.

use serde::{Deserialize, Serialize};

/// Running fuel totals for one runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelLedger {
    /// Fuel consumed by all invocations
    pub consumed: u64,
    /// Invocations recorded
    pub invocations: u64,
    /// Invocations that ran dry
    pub exhausted: u64,
}

impl FuelLedger {
    /// Record one invocation
    pub fn record(&mut self, consumed: u64, exhausted: bool) {
        self.consumed = self.consumed.saturating_add(consumed);
        self.invocations += 1;
        if exhausted {
            self.exhausted += 1;
        }
    }

    /// Mean fuel per invocation
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.invocations == 0 {
            return 0.0;
        }
        self.consumed as f64 / self.invocations as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger() {
        let mut ledger = FuelLedger::default();
        assert_eq!(ledger.mean(), 0.0);
        ledger.record(100, false);
        ledger.record(300, true);
        assert_eq!(ledger.consumed, 400);
        assert_eq!(ledger.exhausted, 1);
        assert_eq!(ledger.mean(), 200.0);
    }
}
