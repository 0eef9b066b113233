use crate::error::SchedulerError;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Highest score a score plugin may return for a node
pub const MAX_NODE_SCORE: i64 = 100;

/// Lowest score a score plugin may return for a node
pub const MIN_NODE_SCORE: i64 = 0;

/// Highest priority an extender may assign to a node
pub const MAX_EXTENDER_PRIORITY: i64 = 10;

/// Outcome code of a plugin invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// The plugin ran and the pod fits
    Success,
    /// The plugin failed to run; fatal for the scheduling attempt
    Error,
    /// The pod does not fit, but might after preemption or state changes
    Unschedulable,
    /// The pod does not fit and nothing on the node can change that
    UnschedulableAndUnresolvable,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::Success => "Success",
            Code::Error => "Error",
            Code::Unschedulable => "Unschedulable",
            Code::UnschedulableAndUnresolvable => "UnschedulableAndUnresolvable",
        };
        f.write_str(name)
    }
}

/// Result of running a plugin (or a chain of plugins) for a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    reasons: Vec<String>,
    plugin: Option<String>,
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

impl Status {
    /// A successful status
    pub fn success() -> Self {
        Self {
            code: Code::Success,
            reasons: Vec::new(),
            plugin: None,
        }
    }

    /// Create a status with a single reason
    pub fn new(code: Code, reason: impl Into<String>) -> Self {
        Self {
            code,
            reasons: vec![reason.into()],
            plugin: None,
        }
    }

    /// Create a status with several reasons
    pub fn with_reasons(code: Code, reasons: Vec<String>) -> Self {
        Self {
            code,
            reasons,
            plugin: None,
        }
    }

    /// Create an Error status
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Code::Error, message)
    }

    /// Create an Unschedulable status
    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self::new(Code::Unschedulable, reason)
    }

    /// Record which plugin produced this status, keeping the first one set
    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        if self.plugin.is_none() {
            self.plugin = Some(plugin.into());
        }
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }

    /// True for both unschedulable codes
    pub fn is_unschedulable(&self) -> bool {
        matches!(
            self.code,
            Code::Unschedulable | Code::UnschedulableAndUnresolvable
        )
    }

    /// All reasons joined into one message
    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }

    pub fn append_reason(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    /// Convert a failed status into a scheduler error
    pub fn as_error(&self) -> SchedulerError {
        SchedulerError::plugin_failed(
            self.plugin.as_deref().unwrap_or("unknown"),
            self.message(),
        )
    }
}

/// Per-node rejection statuses, keyed by node name
pub type NodeToStatusMap = HashMap<String, Status>;

/// Score of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScore {
    /// Node name
    pub name: String,
    /// Score, higher is better
    pub score: i64,
}

impl NodeScore {
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Scores of a set of nodes, in the order the nodes were given
pub type NodeScoreList = Vec<NodeScore>;

/// Node scores produced by each score plugin, keyed by plugin name
pub type PluginToNodeScores = HashMap<String, NodeScoreList>;

/// Outcome of one successful scheduling attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleResult {
    /// Node the scheduler suggests for the pod
    pub suggested_host: String,
    /// Number of nodes the scheduler evaluated
    pub evaluated_nodes: usize,
    /// Number of nodes that passed filtering
    pub feasible_nodes: usize,
}

/// Every evaluated node rejected the pod
#[derive(Debug, Clone)]
pub struct FitError {
    /// `namespace/name` of the pod
    pub pod: String,
    /// Number of nodes in the snapshot
    pub num_all_nodes: usize,
    /// Why each evaluated node was rejected
    pub filtered_nodes_statuses: NodeToStatusMap,
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut histogram: BTreeMap<&str, usize> = BTreeMap::new();
        for status in self.filtered_nodes_statuses.values() {
            for reason in status.reasons() {
                *histogram.entry(reason.as_str()).or_default() += 1;
            }
        }

        let mut reasons: Vec<String> = histogram
            .into_iter()
            .map(|(reason, count)| format!("{} {}", count, reason))
            .collect();
        reasons.sort();

        write!(
            f,
            "0/{} nodes are available: {}.",
            self.num_all_nodes,
            reasons.join(", ")
        )
    }
}
