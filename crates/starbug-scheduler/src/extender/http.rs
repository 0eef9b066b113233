use super::{Extender, ExtenderFilterResult, FailedNodesMap, HostPriority, HostPriorityList};
use crate::cache::NodeInfo;
use crate::config::ExtenderConfig;
use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use starbug_core::{Node, Pod};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Request body of both verbs
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExtenderArgs<'a> {
    pod: &'a Pod,
    /// Full node objects, unless the extender caches nodes itself
    #[serde(skip_serializing_if = "Option::is_none")]
    nodes: Option<NodeList<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_names: Option<Vec<&'a str>>,
}

#[derive(Serialize)]
struct NodeList<'a> {
    items: Vec<&'a Node>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct FilterResponse {
    nodes: Option<NamedItems>,
    node_names: Option<Vec<String>>,
    failed_nodes: FailedNodesMap,
    failed_and_unresolvable_nodes: FailedNodesMap,
    error: String,
}

/// Only the names of returned node objects are needed
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamedItems {
    items: Vec<NamedObject>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamedObject {
    metadata: NamedMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamedMeta {
    name: Option<String>,
}

/// Extender reached over HTTP with JSON bodies
pub struct HttpExtender {
    config: ExtenderConfig,
    client: Client,
}

impl HttpExtender {
    pub fn new(config: ExtenderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| {
                SchedulerError::invalid_config(
                    format!("cannot build HTTP client for extender {}: {}", config.url_prefix, e),
                    "Check the extender timeout and TLS settings",
                )
            })?;

        Ok(Self { config, client })
    }

    fn args<'a>(&self, pod: &'a Pod, nodes: &'a [Arc<NodeInfo>]) -> ExtenderArgs<'a> {
        if self.config.node_cache_capable {
            ExtenderArgs {
                pod,
                nodes: None,
                node_names: Some(nodes.iter().map(|n| n.name()).collect()),
            }
        } else {
            ExtenderArgs {
                pod,
                nodes: Some(NodeList {
                    items: nodes.iter().map(|n| n.node()).collect(),
                }),
                node_names: None,
            }
        }
    }

    async fn send<T: DeserializeOwned>(&self, verb: &str, args: &ExtenderArgs<'_>) -> Result<T> {
        let url = format!("{}/{}", self.config.url_prefix.trim_end_matches('/'), verb);
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .json(args)
            .send()
            .await
            .map_err(|e| SchedulerError::extender_failed(self.name(), format!("HTTP request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SchedulerError::extender_failed(
                self.name(),
                format!("POST {} failed with status {}: {}", verb, status, body),
            ));
        }

        resp.json::<T>().await.map_err(|e| {
            SchedulerError::extender_failed(self.name(), format!("Failed to parse {} response: {}", verb, e))
        })
    }
}

#[async_trait]
impl Extender for HttpExtender {
    fn name(&self) -> &str {
        &self.config.url_prefix
    }

    fn is_interested(&self, pod: &Pod) -> bool {
        if self.config.managed_resources.is_empty() {
            return true;
        }

        let Some(spec) = &pod.spec else {
            return false;
        };
        let managed = |resources: Option<&BTreeMap<String, Quantity>>| {
            resources.is_some_and(|r| {
                self.config
                    .managed_resources
                    .iter()
                    .any(|name| r.contains_key(name))
            })
        };

        spec.containers
            .iter()
            .chain(spec.init_containers.iter().flatten())
            .filter_map(|c| c.resources.as_ref())
            .any(|r| managed(r.requests.as_ref()) || managed(r.limits.as_ref()))
    }

    fn is_ignorable(&self) -> bool {
        self.config.ignorable
    }

    fn weight(&self) -> i64 {
        self.config.weight
    }

    async fn filter(&self, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Result<ExtenderFilterResult> {
        if self.config.filter_verb.is_empty() {
            return Ok(ExtenderFilterResult {
                node_names: nodes.iter().map(|n| n.name().to_string()).collect(),
                failed_nodes: FailedNodesMap::new(),
            });
        }

        let response: FilterResponse = self
            .send(&self.config.filter_verb, &self.args(pod, nodes))
            .await?;
        if !response.error.is_empty() {
            return Err(SchedulerError::extender_failed(self.name(), response.error));
        }

        let node_names = match (response.node_names, response.nodes) {
            (Some(names), _) => names,
            (None, Some(nodes)) => nodes
                .items
                .into_iter()
                .filter_map(|item| item.metadata.name)
                .collect(),
            (None, None) => Vec::new(),
        };

        let mut failed_nodes = response.failed_nodes;
        failed_nodes.extend(response.failed_and_unresolvable_nodes);

        Ok(ExtenderFilterResult {
            node_names,
            failed_nodes,
        })
    }

    async fn prioritize(&self, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Result<HostPriorityList> {
        if self.config.prioritize_verb.is_empty() {
            return Ok(nodes.iter().map(|n| HostPriority::new(n.name(), 0)).collect());
        }

        self.send(&self.config.prioritize_verb, &self.args(pod, nodes))
            .await
    }
}
