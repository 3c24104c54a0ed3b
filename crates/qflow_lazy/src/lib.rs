//! Qflow Lazy Loading
//!
//! Loads heavyweight flow components (templates, modules, policies) on
//! first use, keeps them in a size-bounded cache and preloads the ones
//! likely to be needed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod component;
pub mod config;
pub mod error;
pub mod manager;
pub mod strategy;

pub use cache::{CacheEntry, CacheStats, ComponentCache};
pub use component::{loader_fn, Component, ComponentLoader, ComponentMetadata, ComponentType, ComponentValue, FnLoader};
pub use config::{LazyConfig, LazyConfigPatch};
pub use error::{LoadError, LoadResult};
pub use manager::{LazyLoadingManager, PreloadReport, PreloadTask};
pub use strategy::{AccessCountStrategy, PreloadCandidate, PreloadStrategy, PriorityStrategy};
