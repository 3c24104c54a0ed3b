//! Qflow Core Types
//!
//! Pure types shared by every Qflow crate: identifiers, content hashes,
//! the clock abstraction, resource kinds and smoothing helpers.
//! Nothing in this crate performs I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod hash;
pub mod id;
pub mod kind;
pub mod smoothing;

// Re-exports
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use hash::Hash;
pub use id::{ExecutionId, JobId, OptimizationId, PredictionId, RecommendationId, ResourceId, RunId, StepId};
pub use kind::ResourceKind;
pub use smoothing::{ema, DEFAULT_EMA_ALPHA};
