// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use crate::types::FitError;
use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// The cluster has no nodes at snapshot time
    #[error("no nodes available to schedule pods")]
    #[diagnostic(
        code(scheduler::no_nodes_available),
        help("Register at least one node, then retry the pod")
    )]
    NoNodesAvailable,

    /// Every evaluated node rejected the pod
    #[error("{0}")]
    #[diagnostic(
        code(scheduler::unschedulable),
        help("Check node resources, taints, and pod requirements")
    )]
    Unschedulable(Box<FitError>),

    /// A plugin failed to run (as opposed to rejecting the pod)
    #[error("Plugin {plugin} failed: {message}")]
    #[diagnostic(
        code(scheduler::plugin_failed),
        help("A plugin error aborts the scheduling attempt; the pod should be retried")
    )]
    PluginFailed {
        plugin: String,
        message: String,
    },

    /// An extender call failed
    #[error("Extender {extender} failed: {message}")]
    #[diagnostic(
        code(scheduler::extender_failed),
        help("Check that the extender is reachable, or mark it ignorable")
    )]
    ExtenderFailed {
        extender: String,
        message: String,
    },

    /// Refreshing the node snapshot failed
    #[error("Snapshot failed: {message}")]
    #[diagnostic(
        code(scheduler::snapshot_failed),
        help("The cluster cache could not produce a consistent view of the nodes")
    )]
    SnapshotFailed {
        message: String,
    },

    /// Host selection received no scored nodes
    #[error("empty priority list")]
    #[diagnostic(
        code(scheduler::empty_priority_list),
        help("This is likely a bug. Please report it")
    )]
    EmptyPriorityList,

    /// Invalid scheduler configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(
        code(scheduler::invalid_config),
        help("{suggestion}")
    )]
    InvalidConfig {
        message: String,
        suggestion: String,
    },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("This is an internal error")
    )]
    CoreError(#[from] starbug_core::StarbugError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        message: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create an Unschedulable error
    pub fn unschedulable(fit_error: FitError) -> Self {
        Self::Unschedulable(Box::new(fit_error))
    }

    /// Create a PluginFailed error
    pub fn plugin_failed(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PluginFailed {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create an ExtenderFailed error
    pub fn extender_failed(extender: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtenderFailed {
            extender: extender.into(),
            message: message.into(),
        }
    }

    /// Create a SnapshotFailed error
    pub fn snapshot_failed(message: impl Into<String>) -> Self {
        Self::SnapshotFailed {
            message: message.into(),
        }
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// The per-node detail of an unschedulable outcome, if this is one
    pub fn fit_error(&self) -> Option<&FitError> {
        match self {
            Self::Unschedulable(fit_error) => Some(fit_error),
            _ => None,
        }
    }
}
