use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::ops::{AddAssign, SubAssign};

/// Resource quantities for nodes and pods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

impl ResourceQuantities {
    pub fn new(cpu_millicores: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    /// Parse CPU string (e.g., "2", "1000m", "0.5")
    pub fn parse_cpu(s: &str) -> Result<i64, String> {
        if let Some(m) = s.strip_suffix('m') {
            // Millicores
            m.parse::<i64>()
                .map_err(|e| format!("Invalid CPU millicore value: {}", e))
        } else if let Ok(cores) = s.parse::<f64>() {
            // Cores as float
            Ok((cores * 1000.0) as i64)
        } else {
            Err(format!("Invalid CPU format: {}", s))
        }
    }

    /// Parse memory string (e.g., "128Mi", "1Gi", "1024")
    pub fn parse_memory(s: &str) -> Result<i64, String> {
        if let Some(num) = s.strip_suffix("Ki") {
            Ok(num.parse::<i64>().map_err(|e| e.to_string())? * 1024)
        } else if let Some(num) = s.strip_suffix("Mi") {
            Ok(num.parse::<i64>().map_err(|e| e.to_string())? * 1024 * 1024)
        } else if let Some(num) = s.strip_suffix("Gi") {
            Ok(num.parse::<i64>().map_err(|e| e.to_string())? * 1024 * 1024 * 1024)
        } else {
            // Plain bytes
            s.parse::<i64>().map_err(|e| e.to_string())
        }
    }

    /// Get CPU and memory from a resource map (k8s-openapi format)
    ///
    /// Unparseable quantities count as zero.
    pub fn from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Self {
        let cpu_millicores = resources
            .get("cpu")
            .and_then(|q| Self::parse_cpu(&q.0).ok())
            .unwrap_or(0);

        let memory_bytes = resources
            .get("memory")
            .and_then(|q| Self::parse_memory(&q.0).ok())
            .unwrap_or(0);

        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    /// Sum of the resource requests of every container in the pod
    pub fn from_pod_requests(pod: &Pod) -> Self {
        let mut total = Self::default();
        let Some(spec) = &pod.spec else {
            return total;
        };

        for container in &spec.containers {
            if let Some(requests) = container
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref())
            {
                total += Self::from_k8s_resource_map(requests);
            }
        }

        total
    }

    /// Allocatable resources reported in the node status
    pub fn from_node_allocatable(node: &Node) -> Self {
        node.status
            .as_ref()
            .and_then(|s| s.allocatable.as_ref())
            .map(Self::from_k8s_resource_map)
            .unwrap_or_default()
    }

    /// True when both dimensions are zero
    pub fn is_zero(&self) -> bool {
        self.cpu_millicores == 0 && self.memory_bytes == 0
    }
}

impl AddAssign for ResourceQuantities {
    fn add_assign(&mut self, other: Self) {
        self.cpu_millicores += other.cpu_millicores;
        self.memory_bytes += other.memory_bytes;
    }
}

impl SubAssign for ResourceQuantities {
    fn sub_assign(&mut self, other: Self) {
        self.cpu_millicores -= other.cpu_millicores;
        self.memory_bytes -= other.memory_bytes;
    }
}
