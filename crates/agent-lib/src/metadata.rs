//! Agent-wide metadata shared between collectors
//!
//! Holds the cluster identity and the agent's externally reachable
//! address. Collectors receive a handle instead of touching globals.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Default)]
struct MetadataInner {
    cluster_id: String,
    cluster_name: String,
    external_ip: Option<String>,
}

/// Cloneable handle to the agent metadata
#[derive(Debug, Clone, Default)]
pub struct AgentMetadata {
    inner: Arc<RwLock<MetadataInner>>,
}

impl AgentMetadata {
    pub fn new(cluster_id: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetadataInner {
                cluster_id: cluster_id.into(),
                cluster_name: cluster_name.into(),
                external_ip: None,
            })),
        }
    }

    pub async fn cluster_id(&self) -> String {
        self.inner.read().await.cluster_id.clone()
    }

    pub async fn cluster_name(&self) -> String {
        self.inner.read().await.cluster_name.clone()
    }

    /// Set the cluster id unless one is already known
    pub async fn set_cluster_id_if_not_present(&self, cluster_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.cluster_id.is_empty() || cluster_id.is_empty() {
            return false;
        }
        inner.cluster_id = cluster_id.to_string();
        true
    }

    pub async fn external_ip(&self) -> Option<String> {
        self.inner.read().await.external_ip.clone()
    }

    /// Record the agent external IP; returns true when it changed
    pub async fn set_external_ip(&self, ip: &str) -> bool {
        let mut inner = self.inner.write().await;
        if inner.external_ip.as_deref() == Some(ip) {
            return false;
        }
        info!(external_ip = %ip, "Agent external IP discovered");
        inner.external_ip = Some(ip.to_string());
        true
    }
}
