//! Agent configuration

use agent_lib::sync::TlsPaths;
use agent_lib::ResourceKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Identity sent with every report
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// API server port for health/metrics/trigger endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Topology control plane endpoint
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    #[serde(default)]
    pub cluster_id: String,

    #[serde(default)]
    pub cluster_name: String,

    /// Comma-separated namespaces; empty watches all
    #[serde(default)]
    pub namespaces: String,

    /// Comma-separated resource names to report
    #[serde(default = "default_resources")]
    pub resources: String,

    /// Period between cycles of one kind, in seconds
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// Service whose external IP is published as the agent address
    #[serde(default = "default_agent_service_name")]
    pub agent_service_name: String,

    #[serde(default = "default_virtual_node_selector")]
    pub virtual_node_selector: String,

    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    #[serde(default)]
    pub client_cert_path: Option<PathBuf>,

    #[serde(default)]
    pub client_key_path: Option<PathBuf>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_agent_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| default_node_name())
}

fn default_api_port() -> u16 {
    8080
}

fn default_api_endpoint() -> String {
    "http://topology-server:9090".to_string()
}

fn default_resources() -> String {
    ResourceKind::ALL
        .iter()
        .filter(|kind| **kind != ResourceKind::VirtualNode)
        .map(|kind| kind.resource_name())
        .collect::<Vec<_>>()
        .join(",")
}

fn default_report_interval() -> u64 {
    10
}

fn default_agent_service_name() -> String {
    "cluster-agent".to_string()
}

fn default_virtual_node_selector() -> String {
    "type=virtual-kubelet".to_string()
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            agent_id: default_agent_id(),
            api_port: default_api_port(),
            api_endpoint: default_api_endpoint(),
            cluster_id: String::new(),
            cluster_name: String::new(),
            namespaces: String::new(),
            resources: default_resources(),
            report_interval_secs: default_report_interval(),
            agent_service_name: default_agent_service_name(),
            virtual_node_selector: default_virtual_node_selector(),
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from `AGENT_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AGENT"))
            .build()
            .context("Failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    pub fn namespace_list(&self) -> Vec<String> {
        split_list(&self.namespaces).map(str::to_string).collect()
    }

    /// Enabled kinds; unknown names are logged and ignored
    pub fn resource_kinds(&self) -> Vec<ResourceKind> {
        split_list(&self.resources)
            .filter_map(|name| {
                let kind = ResourceKind::from_resource_name(name);
                if kind.is_none() {
                    warn!(resource = %name, "Ignoring unknown resource");
                }
                kind
            })
            .collect()
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// mTLS material, when all three paths are set
    pub fn tls_paths(&self) -> Option<TlsPaths> {
        match (&self.ca_cert_path, &self.client_cert_path, &self.client_key_path) {
            (Some(ca), Some(cert), Some(key)) => Some(TlsPaths {
                ca_cert_path: ca.clone(),
                client_cert_path: cert.clone(),
                client_key_path: key.clone(),
            }),
            (None, None, None) => None,
            _ => {
                warn!("Incomplete TLS configuration, using plaintext");
                None
            }
        }
    }
}
