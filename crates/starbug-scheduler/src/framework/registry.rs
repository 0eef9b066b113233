use super::{FilterPlugin, PreFilterPlugin, PreScorePlugin, ScorePlugin};
use crate::error::{Result, SchedulerError};
use std::collections::HashMap;
use std::sync::Arc;

/// Plugins available to profiles, by extension point and name
#[derive(Default)]
pub struct Registry {
    pre_filter: HashMap<String, Arc<dyn PreFilterPlugin>>,
    filter: HashMap<String, Arc<dyn FilterPlugin>>,
    pre_score: HashMap<String, Arc<dyn PreScorePlugin>>,
    score: HashMap<String, Arc<dyn ScorePlugin>>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every plugin shipped with the scheduler
    pub fn with_default_plugins() -> Self {
        let mut registry = Self::new();
        crate::plugins::register_defaults(&mut registry);
        registry
    }

    pub fn register_pre_filter(&mut self, plugin: Arc<dyn PreFilterPlugin>) -> &mut Self {
        self.pre_filter.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn register_filter(&mut self, plugin: Arc<dyn FilterPlugin>) -> &mut Self {
        self.filter.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn register_pre_score(&mut self, plugin: Arc<dyn PreScorePlugin>) -> &mut Self {
        self.pre_score.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn register_score(&mut self, plugin: Arc<dyn ScorePlugin>) -> &mut Self {
        self.score.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn pre_filter(&self, name: &str) -> Result<Arc<dyn PreFilterPlugin>> {
        lookup(&self.pre_filter, "preFilter", name)
    }

    pub fn filter(&self, name: &str) -> Result<Arc<dyn FilterPlugin>> {
        lookup(&self.filter, "filter", name)
    }

    pub fn pre_score(&self, name: &str) -> Result<Arc<dyn PreScorePlugin>> {
        lookup(&self.pre_score, "preScore", name)
    }

    pub fn score(&self, name: &str) -> Result<Arc<dyn ScorePlugin>> {
        lookup(&self.score, "score", name)
    }
}

fn lookup<T: ?Sized>(plugins: &HashMap<String, Arc<T>>, point: &str, name: &str) -> Result<Arc<T>> {
    plugins.get(name).cloned().ok_or_else(|| {
        let mut known: Vec<&str> = plugins.keys().map(String::as_str).collect();
        known.sort_unstable();
        SchedulerError::invalid_config(
            format!("unknown {} plugin {}", point, name),
            format!("Use one of the registered {} plugins: {}", point, known.join(", ")),
        )
    })
}
