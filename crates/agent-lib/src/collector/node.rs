//! Node collector

use super::base::{common_info, ResourceSync};
use super::{CollectorContext, CycleReport, ResourceCollector};
use crate::metadata::AgentMetadata;
use crate::models::{NodeInfo, ResourceKind};
use crate::source::{cluster_api, object_key, LazySource, SourceParams};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Label prefix carrying node roles (`node-role.kubernetes.io/<role>`)
pub const LABEL_NODE_ROLE_PREFIX: &str = "node-role.kubernetes.io/";

/// Legacy label whose value is the node role
pub const NODE_LABEL_ROLE: &str = "kubernetes.io/role";

/// Role column value when no role label is present
pub const NO_ROLE: &str = "<none>";

/// Sorted, comma-joined roles of `node`
pub fn node_roles(node: &Node) -> String {
    let roles: BTreeSet<&str> = node
        .metadata
        .labels
        .iter()
        .flatten()
        .filter_map(|(key, value)| {
            if let Some(role) = key.strip_prefix(LABEL_NODE_ROLE_PREFIX) {
                (!role.is_empty()).then_some(role)
            } else if key == NODE_LABEL_ROLE && !value.is_empty() {
                Some(value.as_str())
            } else {
                None
            }
        })
        .collect();

    if roles.is_empty() {
        return NO_ROLE.to_string();
    }
    roles.into_iter().collect::<Vec<_>>().join(",")
}

pub fn project_node(node: &Node, cluster_id: &str, cluster_name: &str) -> NodeInfo {
    NodeInfo {
        common: common_info(&node.metadata),
        role: node_roles(node),
        cluster_id: cluster_id.to_string(),
        cluster_name: cluster_name.to_string(),
    }
}

pub struct NodeCollector {
    sync: ResourceSync,
    source: LazySource<Node>,
    metadata: AgentMetadata,
}

impl NodeCollector {
    pub fn new(ctx: &CollectorContext) -> Self {
        Self::with_source(
            ctx.sync(ResourceKind::Node),
            ctx.cluster_source(ResourceKind::Node, SourceParams::default(), cluster_api::<Node>),
            ctx.metadata.clone(),
        )
    }

    pub fn with_source(sync: ResourceSync, source: LazySource<Node>, metadata: AgentMetadata) -> Self {
        Self {
            sync,
            source,
            metadata,
        }
    }
}

#[async_trait]
impl ResourceCollector for NodeCollector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Node
    }

    async fn report(&self) -> CycleReport {
        let Some(store) = self.source.get() else {
            warn!(kind = %ResourceKind::Node, "Kubernetes client not enabled");
            return self.sync.skipped();
        };

        let cluster_id = self.metadata.cluster_id().await;
        let cluster_name = self.metadata.cluster_name().await;

        // TODO: project every node once the control plane accepts one row per node
        let nodes: Vec<Arc<Node>> = store.list();
        if nodes.len() > 1 {
            debug!(
                first = %object_key(nodes[0].as_ref()),
                skipped = nodes.len() - 1,
                "Reporting first node only"
            );
        }
        let snapshots = nodes
            .first()
            .map(|node| project_node(node, &cluster_id, &cluster_name))
            .into_iter()
            .collect();

        self.sync.run_cycle(snapshots).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node(labels: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some("n1".to_string()),
                uid: Some("node-1".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_node_roles() {
        assert_eq!(node_roles(&node(&[])), NO_ROLE);
        assert_eq!(
            node_roles(&node(&[
                ("node-role.kubernetes.io/worker", ""),
                ("node-role.kubernetes.io/control-plane", ""),
                ("kubernetes.io/role", "master"),
            ])),
            "control-plane,master,worker"
        );
        assert_eq!(node_roles(&node(&[("node-role.kubernetes.io/", "")])), NO_ROLE);
        assert_eq!(node_roles(&node(&[("kubernetes.io/role", "")])), NO_ROLE);
    }

    #[test]
    fn test_project_node_carries_cluster_metadata() {
        let info = project_node(&node(&[("node-role.kubernetes.io/worker", "")]), "c-1", "prod");
        assert_eq!(info.common.uid, "node-1");
        assert_eq!(info.role, "worker");
        assert_eq!(info.cluster_id, "c-1");
        assert_eq!(info.cluster_name, "prod");
    }
}
