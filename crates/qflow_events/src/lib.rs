//! Qflow Events
//!
//! The event model every component reports through, an in-process
//! broadcast bus with isolated subscribers, and the periodic task runner
//! used by background maintenance loops.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod event;
pub mod ticker;

pub use bus::{EventBus, EventHandler, HandlerError, Subscription, TopicFilter};
pub use event::{Event, Topic};
pub use ticker::{spawn_periodic, PeriodicTask, TaskGroup, TaskHandle};
