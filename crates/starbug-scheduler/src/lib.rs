//! Starbug Scheduler - Pod to Node placement
//!
//! This crate provides:
//! - The generic scheduling algorithm (filter, extend, score, select)
//! - A plugin framework with the default filter and score plugins
//! - An equivalence-class cache of filter verdicts
//! - HTTP scheduler extenders
//! - An in-memory cluster cache fed by cluster events

pub mod cache;
pub mod config;
pub mod equivalence;
pub mod error;
pub mod extender;
pub mod framework;
pub mod invalidation;
pub mod parallelize;
pub mod plugins;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use cache::{Cache, InMemoryCache, NodeInfo, Snapshot};
pub use config::SchedulerConfig;
pub use equivalence::{EquivalenceCache, VolumeAwareEquivalence, VolumeClaimStore};
pub use error::{Result, SchedulerError};
pub use framework::{Framework, PluginFramework, Registry};
pub use invalidation::ClusterEventHandler;
pub use scheduler::GenericScheduler;
pub use types::{FitError, ScheduleResult, Status};
