//! Out-of-process scheduler extenders
//!
//! Extenders see the nodes that survived plugin filtering. They can reject
//! more of them and can add their own priorities to the scores.

pub mod http;

pub use http::HttpExtender;

use crate::cache::NodeInfo;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use starbug_core::Pod;
use std::collections::HashMap;
use std::sync::Arc;

/// Node name -> reason the extender rejected it
pub type FailedNodesMap = HashMap<String, String>;

/// Nodes an extender accepted and rejected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtenderFilterResult {
    /// Names of the nodes that passed
    pub node_names: Vec<String>,
    pub failed_nodes: FailedNodesMap,
}

/// Priority an extender assigned to one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostPriority {
    pub host: String,
    /// In `[0, MAX_EXTENDER_PRIORITY]`
    pub score: i64,
}

impl HostPriority {
    pub fn new(host: impl Into<String>, score: i64) -> Self {
        Self {
            host: host.into(),
            score,
        }
    }
}

pub type HostPriorityList = Vec<HostPriority>;

/// A scheduler extender
#[async_trait]
pub trait Extender: Send + Sync {
    /// Identifies the extender in logs and errors
    fn name(&self) -> &str;

    /// Whether this extender wants to see `pod` at all
    fn is_interested(&self, pod: &Pod) -> bool;

    /// Whether scheduling may proceed when this extender fails
    fn is_ignorable(&self) -> bool;

    /// Multiplier applied to this extender's priorities
    fn weight(&self) -> i64;

    async fn filter(&self, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Result<ExtenderFilterResult>;

    /// Host priorities, each expected in `[0, MAX_EXTENDER_PRIORITY]`
    async fn prioritize(&self, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Result<HostPriorityList>;
}
