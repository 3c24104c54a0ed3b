//! Qflow Resource Pools
//!
//! Generic pools for expensive runtime resources. A [`ResourceFactory`]
//! describes how to create, check and tear down one kind of resource; a
//! [`ResourcePool`] keeps a bounded set of them with health sweeps, FIFO
//! waiters, backpressure and scaling operations. The [`PoolManager`] holds
//! pools of different resource types by name and routes by kind.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backpressure;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod lease;
pub mod managed;
pub mod manager;
pub mod pool;
pub mod stats;

// Re-exports
pub use backpressure::{BackpressureController, BackpressureStatus, BackpressureStrategy};
pub use config::PoolConfig;
pub use connection::{TcpConnection, TcpConnectionFactory};
pub use error::{FactoryError, PoolError, PoolResult};
pub use factory::ResourceFactory;
pub use lease::{Lease, Pooled, ReleaseOutcome};
pub use managed::ManagedPool;
pub use manager::{HealthSweep, PoolManager};
pub use pool::ResourcePool;
pub use stats::{DrainReport, HealthReport, PoolStats, ResourceStats};
