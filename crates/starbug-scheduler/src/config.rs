use crate::error::{Result, SchedulerError};
use crate::parallelize::DEFAULT_PARALLELISM;
use crate::plugins::names;
use serde::{Deserialize, Serialize};
use starbug_core::StarbugError;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Share of nodes to find feasible before stopping the search; 0 picks
    /// a value from the cluster size
    pub percentage_of_nodes_to_score: i32,
    /// Concurrent filter workers
    pub parallelism: usize,
    pub enable_equivalence_cache: bool,
    pub profile: ProfileConfig,
    pub extenders: Vec<ExtenderConfig>,
    pub invalidation: InvalidationConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            percentage_of_nodes_to_score: 0,
            parallelism: DEFAULT_PARALLELISM,
            enable_equivalence_cache: true,
            profile: ProfileConfig::default(),
            extenders: Vec::new(),
            invalidation: InvalidationConfig::default(),
        }
    }
}

/// Plugins enabled at each extension point, in run order
///
/// A missing `profile` key selects the default profile. A profile that is
/// given enables exactly the plugins it lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    #[serde(default = "default_profile_name")]
    pub name: String,
    #[serde(default)]
    pub pre_filter: Vec<String>,
    #[serde(default)]
    pub filter: Vec<String>,
    #[serde(default)]
    pub pre_score: Vec<String>,
    #[serde(default)]
    pub score: Vec<ScorePluginConfig>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            name: default_profile_name(),
            pre_filter: vec![names::NODE_RESOURCES_FIT.to_string()],
            filter: vec![
                names::NODE_UNSCHEDULABLE.to_string(),
                names::NODE_RESOURCES_FIT.to_string(),
                names::NODE_SELECTOR.to_string(),
                names::TAINT_TOLERATION.to_string(),
            ],
            pre_score: Vec::new(),
            score: vec![
                ScorePluginConfig {
                    name: names::LEAST_ALLOCATED.to_string(),
                    weight: 1,
                },
                ScorePluginConfig {
                    name: names::BALANCED_ALLOCATION.to_string(),
                    weight: 1,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePluginConfig {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: i64,
}

/// An HTTP extender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtenderConfig {
    /// Base URL; verbs are appended as path segments
    pub url_prefix: String,
    /// Empty disables filtering through this extender
    #[serde(default)]
    pub filter_verb: String,
    /// Empty disables prioritizing through this extender
    #[serde(default)]
    pub prioritize_verb: String,
    #[serde(default = "default_weight")]
    pub weight: i64,
    /// Send node names only; the extender keeps its own node cache
    #[serde(default)]
    pub node_cache_capable: bool,
    /// Failures of an ignorable extender do not fail scheduling
    #[serde(default)]
    pub ignorable: bool,
    /// When set, only pods requesting one of these resources are sent
    #[serde(default)]
    pub managed_resources: Vec<String>,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
}

impl ExtenderConfig {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            filter_verb: String::new(),
            prioritize_verb: String::new(),
            weight: default_weight(),
            node_cache_capable: false,
            ignorable: false,
            managed_resources: Vec::new(),
            http_timeout_seconds: default_http_timeout_seconds(),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

/// Predicates invalidated on every node by cluster-wide events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvalidationConfig {
    /// Invalidated by volume and claim events
    pub volume_predicates: Vec<String>,
    /// Invalidated by pod deletions
    pub affinity_predicates: Vec<String>,
}

fn default_profile_name() -> String {
    "default-scheduler".to_string()
}

fn default_weight() -> i64 {
    1
}

fn default_http_timeout_seconds() -> u64 {
    5
}

impl SchedulerConfig {
    /// Load and validate a YAML (or JSON) configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| StarbugError::io_error(path.display().to_string(), e.to_string()))?;
        let config: Self = starbug_core::from_yaml(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=100).contains(&self.percentage_of_nodes_to_score) {
            return Err(SchedulerError::invalid_config(
                format!(
                    "percentageOfNodesToScore must be within 0..=100, got {}",
                    self.percentage_of_nodes_to_score
                ),
                "Use 0 to size the search from the cluster, or a percentage up to 100",
            ));
        }

        if self.parallelism == 0 {
            return Err(SchedulerError::invalid_config(
                "parallelism must be positive",
                format!("The default is {}", DEFAULT_PARALLELISM),
            ));
        }

        let mut seen = HashSet::new();
        for plugin in &self.profile.score {
            if plugin.weight <= 0 {
                return Err(SchedulerError::invalid_config(
                    format!("score plugin {} has weight {}", plugin.name, plugin.weight),
                    "Score plugin weights must be positive",
                ));
            }
            if !seen.insert(plugin.name.as_str()) {
                return Err(SchedulerError::invalid_config(
                    format!("score plugin {} is listed twice", plugin.name),
                    "List each score plugin once",
                ));
            }
        }

        for extender in &self.extenders {
            if extender.url_prefix.trim().is_empty() {
                return Err(SchedulerError::invalid_config(
                    "extender has an empty urlPrefix",
                    "Set urlPrefix to the extender's base URL",
                ));
            }
            if extender.weight <= 0 {
                return Err(SchedulerError::invalid_config(
                    format!(
                        "extender {} has weight {}",
                        extender.url_prefix, extender.weight
                    ),
                    "Extender weights must be positive",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.parallelism, 16);
        assert!(config.enable_equivalence_cache);
        assert_eq!(config.profile.score.len(), 2);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
percentageOfNodesToScore: 30
enableEquivalenceCache: false
profile:
  name: batch
  filter: [NodeResourcesFit]
  score:
    - name: LeastAllocated
      weight: 3
extenders:
  - urlPrefix: http://127.0.0.1:8888/scheduler
    filterVerb: filter
    prioritizeVerb: prioritize
    weight: 2
    ignorable: true
invalidation:
  volumePredicates: [VolumeZone]
"#;
        let config: SchedulerConfig = starbug_core::from_yaml(yaml).unwrap();
        assert_eq!(config.percentage_of_nodes_to_score, 30);
        assert_eq!(config.parallelism, 16);
        assert!(!config.enable_equivalence_cache);
        assert_eq!(config.profile.name, "batch");
        // listed points only; nothing is inherited from the default profile
        assert!(config.profile.pre_filter.is_empty());
        assert!(config.profile.pre_score.is_empty());
        assert_eq!(config.profile.filter, vec!["NodeResourcesFit"]);
        assert_eq!(config.profile.score.len(), 1);
        assert_eq!(config.profile.score[0].weight, 3);

        let extender = &config.extenders[0];
        assert_eq!(extender.filter_verb, "filter");
        assert!(extender.ignorable);
        assert!(!extender.node_cache_capable);
        assert_eq!(extender.http_timeout(), Duration::from_secs(5));
        assert_eq!(config.invalidation.volume_predicates, vec!["VolumeZone"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = SchedulerConfig {
            percentage_of_nodes_to_score: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.percentage_of_nodes_to_score = 50;
        config.parallelism = 0;
        assert!(config.validate().is_err());

        config.parallelism = 4;
        config.profile.score[0].weight = 0;
        assert!(config.validate().is_err());

        config.profile.score[0].weight = 1;
        config.extenders.push(ExtenderConfig::new(""));
        assert!(config.validate().is_err());

        config.extenders[0].url_prefix = "http://extender".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "parallelism: 8").unwrap();

        let config = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.parallelism, 8);
        assert_eq!(config.profile, ProfileConfig::default());

        assert!(SchedulerConfig::from_file("/nonexistent/starbug.yaml").is_err());
    }

    #[test]
    fn test_profile_without_name_keeps_default_name() {
        let config: SchedulerConfig =
            starbug_core::from_yaml("profile: {filter: [NodeUnschedulable]}").unwrap();
        assert_eq!(config.profile.name, "default-scheduler");
        assert!(config.profile.score.is_empty());
        assert!(config.profile.pre_filter.is_empty());
    }
}
