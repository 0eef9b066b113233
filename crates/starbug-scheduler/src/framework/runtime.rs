use super::{
    CycleState, FilterPlugin, Framework, PodNominator, PreFilterPlugin, PreScorePlugin, Registry,
    ScorePlugin,
};
use crate::cache::{pod_key, NodeInfo};
use crate::config::ProfileConfig;
use crate::equivalence::{EquivalenceCycle, HostPredicate};
use crate::error::Result;
use crate::types::{
    Code, NodeScore, NodeScoreList, PluginToNodeScores, Status, MAX_NODE_SCORE, MIN_NODE_SCORE,
};
use starbug_core::{pod_full_name, pod_priority, Pod};
use std::sync::Arc;
use tracing::{debug, info};

/// Runs the plugins of one profile
pub struct PluginFramework {
    profile_name: String,
    pre_filter_plugins: Vec<Arc<dyn PreFilterPlugin>>,
    filter_plugins: Vec<Arc<dyn FilterPlugin>>,
    pre_score_plugins: Vec<Arc<dyn PreScorePlugin>>,
    /// Score plugins with their weights
    score_plugins: Vec<(Arc<dyn ScorePlugin>, i64)>,
    nominator: Option<Arc<dyn PodNominator>>,
}

impl PluginFramework {
    /// An empty framework; add plugins with the `with_*` builders
    pub fn new(profile_name: impl Into<String>) -> Self {
        Self {
            profile_name: profile_name.into(),
            pre_filter_plugins: Vec::new(),
            filter_plugins: Vec::new(),
            pre_score_plugins: Vec::new(),
            score_plugins: Vec::new(),
            nominator: None,
        }
    }

    /// Build the framework a profile describes
    pub fn from_profile(profile: &ProfileConfig, registry: &Registry) -> Result<Self> {
        let mut framework = Self::new(profile.name.clone());
        for name in &profile.pre_filter {
            framework = framework.with_pre_filter(registry.pre_filter(name)?);
        }
        for name in &profile.filter {
            framework = framework.with_filter(registry.filter(name)?);
        }
        for name in &profile.pre_score {
            framework = framework.with_pre_score(registry.pre_score(name)?);
        }
        for plugin in &profile.score {
            framework = framework.with_score(registry.score(&plugin.name)?, plugin.weight);
        }

        info!(
            "Built profile {} with {} filter and {} score plugins",
            framework.profile_name,
            framework.filter_plugins.len(),
            framework.score_plugins.len()
        );
        Ok(framework)
    }

    pub fn with_pre_filter(mut self, plugin: Arc<dyn PreFilterPlugin>) -> Self {
        self.pre_filter_plugins.push(plugin);
        self
    }

    pub fn with_filter(mut self, plugin: Arc<dyn FilterPlugin>) -> Self {
        self.filter_plugins.push(plugin);
        self
    }

    pub fn with_pre_score(mut self, plugin: Arc<dyn PreScorePlugin>) -> Self {
        self.pre_score_plugins.push(plugin);
        self
    }

    pub fn with_score(mut self, plugin: Arc<dyn ScorePlugin>, weight: i64) -> Self {
        self.score_plugins.push((plugin, weight));
        self
    }

    pub fn with_nominator(mut self, nominator: Arc<dyn PodNominator>) -> Self {
        self.nominator = Some(nominator);
        self
    }

    /// Run every filter plugin against `node_info`, stopping at the first
    /// rejection. With an equivalence cycle, cached verdicts are reused and
    /// fresh ones recorded.
    fn run_filter_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        node_info: &NodeInfo,
        equivalence: Option<&EquivalenceCycle>,
    ) -> Status {
        let pod_name = equivalence.map(|_| pod_full_name(pod));

        for plugin in &self.filter_plugins {
            let independent = plugin.element_independent();
            let status = match (equivalence, pod_name.as_deref()) {
                (Some(cycle), Some(pod_name)) => {
                    match cycle.lookup(pod_name, node_info.name(), plugin.name(), independent) {
                        Some(cached) => cached_status(cached),
                        None => {
                            let status = plugin.filter(state, pod, node_info);
                            if status.code() != Code::Error {
                                cycle.record(
                                    node_info.name(),
                                    plugin.name(),
                                    independent,
                                    status.is_success(),
                                    status.reasons(),
                                );
                            }
                            status
                        }
                    }
                }
                _ => plugin.filter(state, pod, node_info),
            };

            if !status.is_success() {
                return status.with_plugin(plugin.name());
            }
        }

        Status::success()
    }

    /// A copy of `node_info` with the nominated pods of equal or higher
    /// priority added, or `None` when there are none
    fn with_nominated_pods(&self, pod: &Pod, node_info: &NodeInfo) -> Option<NodeInfo> {
        let nominator = self.nominator.as_ref()?;
        let priority = pod_priority(pod);
        let own_key = pod_key(pod);

        let nominated: Vec<Pod> = nominator
            .nominated_pods_for_node(node_info.name())
            .into_iter()
            .filter(|p| pod_priority(p) >= priority && pod_key(p) != own_key)
            .collect();
        if nominated.is_empty() {
            return None;
        }

        let mut info = node_info.clone();
        for p in nominated {
            info.add_pod(p);
        }
        Some(info)
    }
}

fn cached_status(cached: HostPredicate) -> Status {
    if cached.fit {
        Status::success()
    } else {
        Status::with_reasons(Code::Unschedulable, cached.fail_reasons)
    }
}

impl Framework for PluginFramework {
    fn profile_name(&self) -> &str {
        &self.profile_name
    }

    fn run_pre_filter_plugins(&self, state: &CycleState, pod: &Pod) -> Status {
        for plugin in &self.pre_filter_plugins {
            let status = plugin.pre_filter(state, pod);
            if !status.is_success() {
                debug!(
                    "Pre-filter plugin {} rejected pod {}: {}",
                    plugin.name(),
                    pod_full_name(pod),
                    status.message()
                );
                return status.with_plugin(plugin.name());
            }
        }
        Status::success()
    }

    fn has_filter_plugins(&self) -> bool {
        !self.filter_plugins.is_empty()
    }

    fn run_filter_plugins_with_nominated_pods(
        &self,
        state: &CycleState,
        pod: &Pod,
        node_info: &NodeInfo,
    ) -> Status {
        // The pod must fit both with the nominated pods in place (they will
        // most likely land there) and without them (they may not).
        if let Some(with_nominated) = self.with_nominated_pods(pod, node_info) {
            let status = self.run_filter_plugins(state, pod, &with_nominated, None);
            if !status.is_success() {
                return status;
            }
        }

        let equivalence = state.read::<EquivalenceCycle>(EquivalenceCycle::STATE_KEY);
        self.run_filter_plugins(state, pod, node_info, equivalence.as_deref())
    }

    fn run_pre_score_plugins(&self, state: &CycleState, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Status {
        for plugin in &self.pre_score_plugins {
            let status = plugin.pre_score(state, pod, nodes);
            if !status.is_success() {
                return status.with_plugin(plugin.name());
            }
        }
        Status::success()
    }

    fn has_score_plugins(&self) -> bool {
        !self.score_plugins.is_empty()
    }

    fn run_score_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Arc<NodeInfo>],
    ) -> std::result::Result<PluginToNodeScores, Status> {
        let mut result = PluginToNodeScores::with_capacity(self.score_plugins.len());

        for (plugin, weight) in &self.score_plugins {
            let mut scores = NodeScoreList::with_capacity(nodes.len());
            for node in nodes {
                let score = plugin
                    .score(state, pod, node)
                    .map_err(|status| status.with_plugin(plugin.name()))?;
                scores.push(NodeScore::new(node.name(), score));
            }

            let status = plugin.normalize_score(state, pod, &mut scores);
            if !status.is_success() {
                return Err(status.with_plugin(plugin.name()));
            }

            for node_score in scores.iter_mut() {
                if !(MIN_NODE_SCORE..=MAX_NODE_SCORE).contains(&node_score.score) {
                    return Err(Status::error(format!(
                        "score {} for node {} is outside [{}, {}]",
                        node_score.score, node_score.name, MIN_NODE_SCORE, MAX_NODE_SCORE
                    ))
                    .with_plugin(plugin.name()));
                }
                node_score.score *= weight;
            }

            result.insert(plugin.name().to_string(), scores);
        }

        Ok(result)
    }
}
