//! Wall-clock abstraction.
//!
//! Heatmap decay, prediction slots and recommendation windows all read time
//! through a [`Clock`] so tests can drive them with a [`ManualClock`].

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Source of the current time
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Shared handle to the system clock
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a manual clock frozen at `start`
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Create a manual clock frozen at the current system time
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump to an absolute time
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
