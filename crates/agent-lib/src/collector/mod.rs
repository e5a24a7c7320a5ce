//! Resource collectors
//!
//! One collector per resource kind projects live objects into snapshots,
//! diffs them against its identifier cache and reports the batch. The
//! scheduler in [`SyncLoop`] runs them in dependency order so that Services
//! are cached before Pods and Ingresses link against them.

mod base;
mod daemonset;
mod deployment;
mod ingress;
mod links;
mod r#loop;
mod namespace;
mod node;
mod pod;
mod replicaset;
mod service;
mod virtual_node;


pub use base::{common_info, owner_uid, ResourceSync, SharedCache};
pub use daemonset::{project_daemonset, DaemonSetCollector};
pub use deployment::{project_deployment, DeploymentCollector};
pub use ingress::{ingress_address, project_ingress, IngressCollector};
pub use links::{
    build_links, LinkKind, LinkMatcher, Linkable, Operator, Requirement, Selector, SelectorSet,
    SelectorSource,
};
pub use namespace::NamespaceCollector;
pub use node::{node_roles, project_node, NodeCollector};
pub use pod::{pod_state, pod_uid, project_pod, restart_count, PodCollector};
pub use r#loop::{SyncConfig, SyncLoop, SyncLoopBuilder};
pub use replicaset::{project_replicaset, ReplicaSetCollector};
pub use service::{
    project_service, select_agent_ip, service_external_ip, service_ports, ServiceCollector,
};
pub use virtual_node::{project_virtual_node, tombstone_records, VirtualNodeCollector};

use crate::metadata::AgentMetadata;
use crate::models::ResourceKind;
use crate::observability::AgentMetrics;
use crate::source::{ApiFactory, KubeChannel, LazySource, SourceParams, WatchedObject};
use crate::sync::Reporter;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

pub use async_trait::async_trait;

/// One collector per resource kind
#[async_trait]
pub trait ResourceCollector: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Run one collect/diff/report/sweep cycle
    async fn report(&self) -> CycleReport;
}

/// Counters of one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    /// Live objects projected
    pub observed: usize,
    /// Objects sent as full snapshots
    pub full: usize,
    pub tombstones: usize,
    pub live_delivered: bool,
    pub tombstones_delivered: bool,
}

impl CycleStats {
    pub fn delivered(&self) -> bool {
        self.live_delivered && self.tombstones_delivered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "stats", rename_all = "lowercase")]
pub enum CycleOutcome {
    /// No watch source was available
    Skipped,
    Completed(CycleStats),
}

/// Result of one collector cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub kind: ResourceKind,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn completed(kind: ResourceKind, stats: CycleStats) -> Self {
        Self {
            kind,
            outcome: CycleOutcome::Completed(stats),
        }
    }

    pub fn skipped(kind: ResourceKind) -> Self {
        Self {
            kind,
            outcome: CycleOutcome::Skipped,
        }
    }

    pub fn stats(&self) -> Option<&CycleStats> {
        match &self.outcome {
            CycleOutcome::Completed(stats) => Some(stats),
            CycleOutcome::Skipped => None,
        }
    }
}

/// Agent-lifetime dependencies handed to every collector
#[derive(Clone)]
pub struct CollectorContext {
    pub channel: KubeChannel,
    pub reporter: Arc<dyn Reporter>,
    pub metrics: AgentMetrics,
    pub metadata: AgentMetadata,
    /// Watched namespaces; empty or containing `""` means all
    pub namespaces: Vec<String>,
    /// Service whose external IP is published as the agent address
    pub agent_service_name: String,
    /// Label selector identifying virtual nodes
    pub virtual_node_selector: String,
}

impl CollectorContext {
    pub fn sync(&self, kind: ResourceKind) -> ResourceSync {
        ResourceSync::new(kind, Arc::clone(&self.reporter), self.metrics.clone())
    }

    /// Lazy source over the configured namespaces
    pub fn namespaced_source<K: WatchedObject>(
        &self,
        kind: ResourceKind,
        params: SourceParams,
        api: ApiFactory<K>,
    ) -> LazySource<K> {
        LazySource::new(kind.resource_name(), self.channel.clone(), self.namespaces.clone(), params, api)
    }

    /// Lazy source for a cluster-scoped kind
    pub fn cluster_source<K: WatchedObject>(
        &self,
        kind: ResourceKind,
        params: SourceParams,
        api: ApiFactory<K>,
    ) -> LazySource<K> {
        LazySource::new(kind.resource_name(), self.channel.clone(), Vec::new(), params, api)
    }
}

/// Build collectors for `kinds` in dependency order. Pods and Ingresses
/// always get a Service collector to link against, even when Services are
/// not reported themselves.
pub fn build_collectors(ctx: &CollectorContext, kinds: &[ResourceKind]) -> Vec<Arc<dyn ResourceCollector>> {
    let enabled: HashSet<ResourceKind> = kinds.iter().copied().collect();
    let services = Arc::new(ServiceCollector::new(ctx));
    let deployments = Arc::new(DeploymentCollector::new(ctx));

    let mut collectors: Vec<Arc<dyn ResourceCollector>> = Vec::new();
    for kind in ResourceKind::ALL {
        if !enabled.contains(&kind) {
            continue;
        }
        let collector: Arc<dyn ResourceCollector> = match kind {
            ResourceKind::Namespace => Arc::new(NamespaceCollector::new(ctx)),
            ResourceKind::Service => Arc::clone(&services) as Arc<dyn ResourceCollector>,
            ResourceKind::Deployment => Arc::clone(&deployments) as Arc<dyn ResourceCollector>,
            ResourceKind::ReplicaSet => Arc::new(ReplicaSetCollector::new(ctx)),
            ResourceKind::DaemonSet => Arc::new(DaemonSetCollector::new(ctx)),
            ResourceKind::Pod => Arc::new(PodCollector::new(
                ctx,
                Arc::clone(&services),
                enabled
                    .contains(&ResourceKind::Deployment)
                    .then(|| Arc::clone(&deployments) as Arc<dyn SelectorSource>),
            )),
            ResourceKind::Ingress => Arc::new(IngressCollector::new(ctx, Arc::clone(&services))),
            ResourceKind::Node => Arc::new(NodeCollector::new(ctx)),
            ResourceKind::VirtualNode => Arc::new(VirtualNodeCollector::new(ctx)),
        };
        collectors.push(collector);
    }

    info!(count = collectors.len(), "Collectors created");
    collectors
}
