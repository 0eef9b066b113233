use crate::cache::{Cache, NodeInfo, Snapshot};
use crate::config::SchedulerConfig;
use crate::equivalence::{EquivalenceCache, EquivalenceCycle, EquivalencePodGenerator};
use crate::error::{Result, SchedulerError};
use crate::extender::{Extender, HttpExtender};
use crate::framework::{CycleState, Framework};
use crate::parallelize::{ErrorChannel, Parallelizer};
use crate::types::{
    Code, FitError, NodeScore, NodeScoreList, NodeToStatusMap, ScheduleResult, Status,
    MAX_EXTENDER_PRIORITY, MAX_NODE_SCORE,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use starbug_core::{pod_full_name, Pod};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Below this many nodes every node is searched
pub const MIN_FEASIBLE_NODES_TO_FIND: usize = 100;

/// Lower bound of the adaptive search percentage
pub const MIN_FEASIBLE_NODES_PERCENTAGE_TO_FIND: i64 = 5;

/// Adaptive search percentage for a small cluster; shrinks by one point per
/// 125 nodes
const ADAPTIVE_PERCENTAGE_BASE: i64 = 50;

/// Attempts slower than this are logged with per-step timings
const SLOW_SCHEDULE_THRESHOLD: Duration = Duration::from_millis(100);

/// Picks a node for one pod at a time
///
/// Holds the scheduling state that survives between attempts: the snapshot
/// (refreshed incrementally), the rotating search cursor, and the random
/// source used to break score ties.
pub struct GenericScheduler {
    cache: Arc<dyn Cache>,
    framework: Arc<dyn Framework>,
    extenders: Vec<Arc<dyn Extender>>,
    equivalence_cache: Option<Arc<EquivalenceCache>>,
    snapshot: Snapshot,
    percentage_of_nodes_to_score: i32,
    next_start_node_index: usize,
    parallelizer: Parallelizer,
    rng: Box<dyn RngCore + Send>,
}

impl GenericScheduler {
    pub fn new(
        cache: Arc<dyn Cache>,
        framework: Arc<dyn Framework>,
        percentage_of_nodes_to_score: i32,
    ) -> Self {
        Self {
            cache,
            framework,
            extenders: Vec::new(),
            equivalence_cache: None,
            snapshot: Snapshot::new(),
            percentage_of_nodes_to_score,
            next_start_node_index: 0,
            parallelizer: Parallelizer::default(),
            rng: Box::new(StdRng::from_os_rng()),
        }
    }

    /// Assemble a scheduler from configuration, building its HTTP extenders
    pub fn from_config(
        config: &SchedulerConfig,
        cache: Arc<dyn Cache>,
        framework: Arc<dyn Framework>,
        equivalence: Arc<dyn EquivalencePodGenerator>,
    ) -> Result<Self> {
        config.validate()?;

        let extenders = config
            .extenders
            .iter()
            .map(|c| HttpExtender::new(c.clone()).map(|e| Arc::new(e) as Arc<dyn Extender>))
            .collect::<Result<Vec<_>>>()?;

        let mut scheduler = Self::new(cache, framework, config.percentage_of_nodes_to_score)
            .with_parallelism(config.parallelism)
            .with_extenders(extenders);
        if config.enable_equivalence_cache {
            scheduler = scheduler.with_equivalence_cache(Arc::new(EquivalenceCache::new(equivalence)));
        }

        info!(
            "Scheduler ready: profile {}, {} extender(s), equivalence cache {}",
            scheduler.framework.profile_name(),
            scheduler.extenders.len(),
            if config.enable_equivalence_cache {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(scheduler)
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelizer = Parallelizer::new(parallelism);
        self
    }

    pub fn with_extenders(mut self, extenders: Vec<Arc<dyn Extender>>) -> Self {
        self.extenders = extenders;
        self
    }

    pub fn with_equivalence_cache(mut self, cache: Arc<EquivalenceCache>) -> Self {
        self.equivalence_cache = Some(cache);
        self
    }

    /// Replace the tie-breaking random source
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn equivalence_cache(&self) -> Option<&Arc<EquivalenceCache>> {
        self.equivalence_cache.as_ref()
    }

    /// Pick a node for `pod`
    pub async fn schedule(&mut self, pod: &Pod) -> Result<ScheduleResult> {
        let started = Instant::now();
        let pod_name = pod_full_name(pod);
        debug!("Attempting to schedule pod {}", pod_name);

        let state = Arc::new(CycleState::new());
        // the cycle token must predate the snapshot
        if let Some(ecache) = &self.equivalence_cache {
            if let Some(cycle) = EquivalenceCycle::begin(ecache, pod) {
                state.write(EquivalenceCycle::STATE_KEY, cycle);
            }
        }

        self.cache
            .update_snapshot(&mut self.snapshot)
            .map_err(|e| SchedulerError::snapshot_failed(e.to_string()))?;
        let snapshot_done = started.elapsed();

        let num_all_nodes = self.snapshot.num_nodes();
        if num_all_nodes == 0 {
            return Err(SchedulerError::NoNodesAvailable);
        }

        let pod = Arc::new(pod.clone());
        let (feasible, statuses) = self.find_nodes_that_fit_pod(&state, &pod).await?;
        let filter_done = started.elapsed();

        if feasible.is_empty() {
            debug!(
                "Pod {} fits none of {} nodes",
                pod_name, num_all_nodes
            );
            return Err(SchedulerError::unschedulable(FitError {
                pod: pod_name,
                num_all_nodes,
                filtered_nodes_statuses: statuses,
            }));
        }

        if feasible.len() == 1 {
            let result = ScheduleResult {
                suggested_host: feasible[0].name().to_string(),
                evaluated_nodes: 1 + statuses.len(),
                feasible_nodes: 1,
            };
            log_if_slow(
                &pod_name,
                started,
                &[("snapshot", snapshot_done), ("filter", filter_done)],
            );
            return Ok(result);
        }

        let priority_list = self.prioritize_nodes(&state, &pod, &feasible).await?;
        let score_done = started.elapsed();

        let suggested_host = self.select_host(&priority_list)?;
        log_if_slow(
            &pod_name,
            started,
            &[
                ("snapshot", snapshot_done),
                ("filter", filter_done),
                ("score", score_done),
            ],
        );

        Ok(ScheduleResult {
            suggested_host,
            evaluated_nodes: feasible.len() + statuses.len(),
            feasible_nodes: feasible.len(),
        })
    }

    /// Pre-filter, then plugin filters, then extender filters
    async fn find_nodes_that_fit_pod(
        &mut self,
        state: &Arc<CycleState>,
        pod: &Arc<Pod>,
    ) -> Result<(Vec<Arc<NodeInfo>>, NodeToStatusMap)> {
        let mut statuses = NodeToStatusMap::new();

        let status = self.framework.run_pre_filter_plugins(state, pod);
        if !status.is_success() {
            if !status.is_unschedulable() {
                return Err(status.as_error());
            }
            // the pod fits nowhere; every node gets the same verdict
            for node in self.snapshot.node_infos() {
                statuses.insert(node.name().to_string(), status.clone());
            }
            return Ok((Vec::new(), statuses));
        }

        let feasible = self
            .find_nodes_that_pass_filters(state, pod, &mut statuses)
            .await?;
        let feasible = self
            .find_nodes_that_pass_extenders(pod, feasible, &mut statuses)
            .await?;
        Ok((feasible, statuses))
    }

    /// Search the snapshot for feasible nodes, starting at the rotating
    /// cursor and stopping once enough have been found
    pub async fn find_nodes_that_pass_filters(
        &mut self,
        state: &Arc<CycleState>,
        pod: &Arc<Pod>,
        statuses: &mut NodeToStatusMap,
    ) -> Result<Vec<Arc<NodeInfo>>> {
        let nodes = self.snapshot.node_infos().to_vec();
        let num_all_nodes = nodes.len();
        if num_all_nodes == 0 {
            return Ok(Vec::new());
        }
        let num_nodes_to_find = self.num_feasible_nodes_to_find(num_all_nodes);
        let start = self.next_start_node_index % num_all_nodes;

        if !self.framework.has_filter_plugins() {
            let feasible = (0..num_nodes_to_find)
                .map(|i| nodes[(start + i) % num_all_nodes].clone())
                .collect();
            self.next_start_node_index = (start + num_nodes_to_find) % num_all_nodes;
            return Ok(feasible);
        }

        let search = Arc::new(FilterSearch {
            framework: self.framework.clone(),
            state: state.clone(),
            pod: pod.clone(),
            nodes,
            start,
            limit: num_nodes_to_find,
            slots: (0..num_nodes_to_find).map(|_| OnceLock::new()).collect(),
            found: AtomicUsize::new(0),
            statuses: Mutex::new(NodeToStatusMap::new()),
            errors: ErrorChannel::new(),
            cancel: CancellationToken::new(),
        });

        let worker = search.clone();
        self.parallelizer
            .until(&search.cancel, num_all_nodes, move |i| worker.check_node(i))
            .await?;

        if let Some(err) = search.errors.receive() {
            return Err(err);
        }

        let feasible: Vec<Arc<NodeInfo>> = search
            .slots
            .iter()
            .filter_map(|slot| slot.get().cloned())
            .collect();
        let rejected = std::mem::take(&mut *search.statuses.lock());

        self.next_start_node_index = (start + feasible.len() + rejected.len()) % num_all_nodes;
        trace!(
            "Filter search found {} of {} wanted nodes, rejected {}",
            feasible.len(),
            num_nodes_to_find,
            rejected.len()
        );

        statuses.extend(rejected);
        Ok(feasible)
    }

    /// Run the interested extenders over the feasible nodes, in order
    async fn find_nodes_that_pass_extenders(
        &self,
        pod: &Pod,
        mut feasible: Vec<Arc<NodeInfo>>,
        statuses: &mut NodeToStatusMap,
    ) -> Result<Vec<Arc<NodeInfo>>> {
        for extender in &self.extenders {
            if feasible.is_empty() {
                break;
            }
            if !extender.is_interested(pod) {
                continue;
            }

            let result = match extender.filter(pod, &feasible).await {
                Ok(result) => result,
                Err(e) if extender.is_ignorable() => {
                    warn!(
                        "Skipping extender {} as it returned error {} and has ignorable flag set",
                        extender.name(),
                        e
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            for (node_name, reason) in result.failed_nodes {
                match statuses.get_mut(&node_name) {
                    Some(status) => status.append_reason(reason),
                    None => {
                        let status = Status::unschedulable(reason).with_plugin(extender.name());
                        statuses.insert(node_name, status);
                    }
                }
            }

            // only nodes the extender was given can survive it
            let accepted: HashSet<&str> = result.node_names.iter().map(String::as_str).collect();
            feasible.retain(|node| accepted.contains(node.name()));
        }

        Ok(feasible)
    }

    /// Combined plugin and extender score of every node
    pub async fn prioritize_nodes(
        &self,
        state: &Arc<CycleState>,
        pod: &Pod,
        nodes: &[Arc<NodeInfo>],
    ) -> Result<NodeScoreList> {
        if self.extenders.is_empty() && !self.framework.has_score_plugins() {
            return Ok(nodes.iter().map(|n| NodeScore::new(n.name(), 1)).collect());
        }

        let status = self.framework.run_pre_score_plugins(state, pod, nodes);
        if !status.is_success() {
            return Err(status.as_error());
        }

        let plugin_scores = self
            .framework
            .run_score_plugins(state, pod, nodes)
            .map_err(|status| status.as_error())?;

        let mut result: NodeScoreList = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let total = plugin_scores
                    .values()
                    .filter_map(|scores| scores.get(i))
                    .map(|s| s.score)
                    .sum();
                NodeScore::new(node.name(), total)
            })
            .collect();

        if !self.extenders.is_empty() {
            let combined = self.prioritize_with_extenders(pod, nodes).await;
            for node_score in result.iter_mut() {
                if let Some(score) = combined.get(&node_score.name) {
                    node_score.score = node_score
                        .score
                        .saturating_add(score.saturating_mul(MAX_NODE_SCORE / MAX_EXTENDER_PRIORITY));
                }
            }
        }

        for node_score in &result {
            trace!(
                "Pod {} on node {}: final score {}",
                pod_full_name(pod),
                node_score.name,
                node_score.score
            );
        }
        Ok(result)
    }

    /// Weighted extender priorities per host; failed extenders contribute
    /// nothing
    async fn prioritize_with_extenders(&self, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> HashMap<String, i64> {
        let interested: Vec<&Arc<dyn Extender>> = self
            .extenders
            .iter()
            .filter(|e| e.is_interested(pod))
            .collect();
        let results = join_all(interested.iter().map(|e| e.prioritize(pod, nodes))).await;

        let mut combined: HashMap<String, i64> = HashMap::new();
        for (extender, result) in interested.into_iter().zip(results) {
            let priorities = result.and_then(|priorities| {
                let out_of_range = priorities
                    .iter()
                    .find(|p| !(0..=MAX_EXTENDER_PRIORITY).contains(&p.score))
                    .map(|p| {
                        format!(
                            "priority {} for host {} is outside [0, {}]",
                            p.score, p.host, MAX_EXTENDER_PRIORITY
                        )
                    });
                match out_of_range {
                    Some(message) => Err(SchedulerError::extender_failed(extender.name(), message)),
                    None => Ok(priorities),
                }
            });

            match priorities {
                Ok(priorities) => {
                    let weight = extender.weight();
                    for priority in priorities {
                        let total = combined.entry(priority.host).or_default();
                        *total = total.saturating_add(priority.score.saturating_mul(weight));
                    }
                }
                Err(e) => debug!(
                    "Ignoring prioritize error from extender {}: {}",
                    extender.name(),
                    e
                ),
            }
        }
        combined
    }

    /// Highest-scoring node, ties broken uniformly at random
    pub fn select_host(&mut self, node_scores: &NodeScoreList) -> Result<String> {
        let mut scores = node_scores.iter();
        let Some(first) = scores.next() else {
            return Err(SchedulerError::EmptyPriorityList);
        };

        let mut max_score = first.score;
        let mut selected = &first.name;
        let mut tied: u32 = 1;
        for node_score in scores {
            if node_score.score > max_score {
                max_score = node_score.score;
                selected = &node_score.name;
                tied = 1;
            } else if node_score.score == max_score {
                tied += 1;
                // replace the pick with probability 1/tied
                if self.rng.random_range(0..tied) == 0 {
                    selected = &node_score.name;
                }
            }
        }

        Ok(selected.clone())
    }

    /// How many feasible nodes to look for before the search stops
    pub fn num_feasible_nodes_to_find(&self, num_all_nodes: usize) -> usize {
        if num_all_nodes < MIN_FEASIBLE_NODES_TO_FIND || self.percentage_of_nodes_to_score >= 100 {
            return num_all_nodes;
        }

        let mut percentage = i64::from(self.percentage_of_nodes_to_score);
        if percentage <= 0 {
            percentage = (ADAPTIVE_PERCENTAGE_BASE - num_all_nodes as i64 / 125)
                .max(MIN_FEASIBLE_NODES_PERCENTAGE_TO_FIND);
        }

        let num_nodes = num_all_nodes as i64 * percentage / 100;
        (num_nodes as usize).max(MIN_FEASIBLE_NODES_TO_FIND)
    }
}

/// Shared state of one parallel filter search
struct FilterSearch {
    framework: Arc<dyn Framework>,
    state: Arc<CycleState>,
    pod: Arc<Pod>,
    nodes: Vec<Arc<NodeInfo>>,
    start: usize,
    limit: usize,
    /// Feasible nodes in the order their slots were claimed
    slots: Vec<OnceLock<Arc<NodeInfo>>>,
    found: AtomicUsize,
    statuses: Mutex<NodeToStatusMap>,
    errors: ErrorChannel,
    cancel: CancellationToken,
}

impl FilterSearch {
    fn check_node(&self, i: usize) {
        let node = &self.nodes[(self.start + i) % self.nodes.len()];
        let status = self
            .framework
            .run_filter_plugins_with_nominated_pods(&self.state, &self.pod, node);

        match status.code() {
            Code::Success => {
                let index = self.found.fetch_add(1, Ordering::SeqCst);
                if index >= self.limit {
                    // lost the race for the last slot
                    self.found.fetch_sub(1, Ordering::SeqCst);
                    self.cancel.cancel();
                    return;
                }
                let _ = self.slots[index].set(node.clone());
                if index + 1 == self.limit {
                    self.cancel.cancel();
                }
            }
            Code::Error => self.errors.send_with_cancel(status.as_error(), &self.cancel),
            Code::Unschedulable | Code::UnschedulableAndUnresolvable => {
                self.statuses.lock().insert(node.name().to_string(), status);
            }
        }
    }
}

fn log_if_slow(pod_name: &str, started: Instant, steps: &[(&str, Duration)]) {
    let elapsed = started.elapsed();
    if elapsed <= SLOW_SCHEDULE_THRESHOLD {
        return;
    }

    let breakdown: Vec<String> = steps
        .iter()
        .map(|(step, at)| format!("{} done at {:?}", step, at))
        .collect();
    warn!(
        "Scheduling pod {} took {:?}: {}",
        pod_name,
        elapsed,
        breakdown.join(", ")
    );
}
