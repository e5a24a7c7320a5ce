//! Virtual node collector
//!
//! A virtual node record nests the pods scheduled onto the node. Nodes are
//! diffed in the primary cache and their pods in a secondary cache whose
//! entries remember the owning node, so pods tombstone independently.

use super::base::{common_info, ResourceSync, SharedCache};
use super::node::node_roles;
use super::pod::project_pod;
use super::{CollectorContext, CycleReport, CycleStats, ResourceCollector};
use crate::identifier::{IdentifierCache, Tombstone};
use crate::metadata::AgentMetadata;
use crate::models::{
    NodeAddressInfo, NodeCapacity, NodeSystemInfo, PodInfo, ResourceKind, Snapshot, VirtualNodeInfo,
};
use crate::source::{
    cluster_api, namespaced_api, KubeChannel, LazySource, ObjectStore, SourceParams, WatchSource,
    ALL_NAMESPACES,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub fn project_virtual_node(node: &Node, cluster_id: &str, cluster_name: &str) -> VirtualNodeInfo {
    let status = node.status.as_ref();

    let node_info = status.and_then(|s| s.node_info.as_ref()).map(|i| NodeSystemInfo {
        architecture: i.architecture.clone(),
        container_runtime_version: i.container_runtime_version.clone(),
        kernel_version: i.kernel_version.clone(),
        kube_proxy_version: i.kube_proxy_version.clone(),
        kubelet_version: i.kubelet_version.clone(),
        operating_system: i.operating_system.clone(),
        os_image: i.os_image.clone(),
    });

    let capacity = status.map(|s| {
        let allocatable = s.allocatable.as_ref();
        let quantity = |name: &str| {
            allocatable
                .and_then(|a| a.get(name))
                .map(|q| q.0.clone())
                .unwrap_or_default()
        };
        NodeCapacity {
            cpu: quantity("cpu"),
            memory: quantity("memory"),
        }
    });

    let addresses = status
        .and_then(|s| s.addresses.as_ref())
        .into_iter()
        .flatten()
        .map(|a| NodeAddressInfo {
            address_type: a.type_.clone(),
            address: a.address.clone(),
        })
        .collect();

    VirtualNodeInfo {
        common: common_info(&node.metadata),
        role: node_roles(node),
        cluster_id: cluster_id.to_string(),
        cluster_name: cluster_name.to_string(),
        node_info,
        capacity,
        addresses,
        pods: Vec::new(),
    }
}

/// Group tombstones into node records: dead nodes carry their pods'
/// tombstones, pods removed from a live node ride on a reference to it
pub fn tombstone_records(
    node_tombstones: Vec<Tombstone>,
    pod_tombstones: Vec<Tombstone>,
    nodes: &IdentifierCache,
) -> Vec<VirtualNodeInfo> {
    let mut orphans: BTreeMap<String, Vec<PodInfo>> = BTreeMap::new();
    for pod in pod_tombstones {
        orphans
            .entry(pod.parent.unwrap_or_default())
            .or_default()
            .push(PodInfo::reference(&pod.uid, &pod.cid, false));
    }

    let mut records: Vec<VirtualNodeInfo> = node_tombstones
        .iter()
        .map(|node| {
            let mut record = VirtualNodeInfo::reference(&node.uid, &node.cid, false);
            record.pods = orphans.remove(&node.uid).unwrap_or_default();
            record
        })
        .collect();

    for (parent, pods) in orphans {
        match nodes.get(&parent).filter(|entry| !entry.cid.is_empty()) {
            Some(entry) => {
                let mut record = VirtualNodeInfo::reference(&entry.uid, &entry.cid, true);
                record.pods = pods;
                records.push(record);
            }
            None => debug!(node = %parent, pods = pods.len(), "Dropping pod tombstones of unacknowledged node"),
        }
    }
    records
}

pub struct VirtualNodeCollector {
    sync: ResourceSync,
    pods_cache: SharedCache,
    nodes: LazySource<Node>,
    channel: KubeChannel,
    pod_sources: Mutex<HashMap<String, WatchSource<Pod>>>,
    metadata: AgentMetadata,
}

impl VirtualNodeCollector {
    pub fn new(ctx: &CollectorContext) -> Self {
        Self::with_source(
            ctx.sync(ResourceKind::VirtualNode),
            ctx.cluster_source(
                ResourceKind::VirtualNode,
                SourceParams::labels(ctx.virtual_node_selector.clone()),
                cluster_api::<Node>,
            ),
            ctx.channel.clone(),
            ctx.metadata.clone(),
        )
    }

    pub fn with_source(
        sync: ResourceSync,
        nodes: LazySource<Node>,
        channel: KubeChannel,
        metadata: AgentMetadata,
    ) -> Self {
        let pods_cache: SharedCache = Arc::new(Mutex::new(IdentifierCache::new()));
        Self {
            sync: sync.with_secondary_cache(Arc::clone(&pods_cache)),
            pods_cache,
            nodes,
            channel,
            pod_sources: Mutex::new(HashMap::new()),
            metadata,
        }
    }

    pub fn node_cache(&self) -> SharedCache {
        self.sync.cache()
    }

    pub fn pods_cache(&self) -> SharedCache {
        Arc::clone(&self.pods_cache)
    }

    /// Serve the pods of `node_name` from `store` instead of a watch
    pub async fn insert_pod_store(&self, node_name: impl Into<String>, store: ObjectStore<Pod>) {
        self.pod_sources
            .lock()
            .await
            .insert(node_name.into(), WatchSource::from_store(store));
    }

    /// Pods per live node. Sources of vanished nodes are dropped, which
    /// stops their reflectors.
    async fn pods_by_node(&self, names: &[String]) -> HashMap<String, Vec<Arc<Pod>>> {
        let mut sources = self.pod_sources.lock().await;

        let live: HashSet<&str> = names.iter().map(String::as_str).collect();
        sources.retain(|name, _| {
            let keep = live.contains(name.as_str());
            if !keep {
                info!(node = %name, "Stopping pod source of removed virtual node");
            }
            keep
        });

        let mut pods = HashMap::with_capacity(names.len());
        for name in names {
            if !sources.contains_key(name) {
                let created = self.channel.reflect(
                    &format!("{}/{name}/pods", ResourceKind::VirtualNode),
                    &[ALL_NAMESPACES.to_string()],
                    &SourceParams::fields(format!("spec.nodeName={name}")),
                    namespaced_api::<Pod>,
                );
                match created {
                    Some(source) => {
                        sources.insert(name.clone(), source);
                    }
                    None => {
                        warn!(node = %name, "Pod source unavailable for virtual node");
                        continue;
                    }
                }
            }
            if let Some(source) = sources.get(name) {
                pods.insert(name.clone(), source.store().list());
            }
        }
        pods
    }
}

#[async_trait]
impl ResourceCollector for VirtualNodeCollector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VirtualNode
    }

    async fn report(&self) -> CycleReport {
        let Some(store) = self.nodes.get() else {
            warn!(kind = %ResourceKind::VirtualNode, "Kubernetes client not enabled");
            return self.sync.skipped();
        };
        let _cycle = self.sync.begin_cycle().await;
        let started = Instant::now();

        let cluster_id = self.metadata.cluster_id().await;
        let cluster_name = self.metadata.cluster_name().await;

        let nodes = store.list();
        let names: Vec<String> = nodes
            .iter()
            .filter_map(|node| node.metadata.name.clone())
            .collect();
        let pods_by_node = self.pods_by_node(&names).await;

        let mut full = 0;
        let mut pods_observed = 0;
        let mut records = Vec::with_capacity(nodes.len());
        {
            let node_cache = self.sync.cache();
            let mut node_cache = node_cache.lock().await;
            let mut pod_cache = self.pods_cache.lock().await;

            for node in &nodes {
                let observation =
                    node_cache.observe(project_virtual_node(node, &cluster_id, &cluster_name));
                if observation.is_full() {
                    full += 1;
                }
                let mut record = observation.snapshot;
                let node_uid = record.common.uid.clone();

                let pods = node
                    .metadata
                    .name
                    .as_ref()
                    .and_then(|name| pods_by_node.get(name))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                pods_observed += pods.len();
                record.pods = pods
                    .iter()
                    .map(|pod| {
                        pod_cache
                            .observe_with_parent(project_pod(pod), Some(&node_uid))
                            .snapshot
                    })
                    .collect();
                records.push(record);
            }
        }
        debug!(nodes = nodes.len(), pods = pods_observed, "Projected virtual nodes");

        let live_delivered = self.sync.deliver(true, &records).await;
        if live_delivered {
            self.sync
                .metrics()
                .add_objects_reported(ResourceKind::VirtualNode, full, records.len() - full);
        }

        let (tombstones, tombstone_count) = {
            let node_cache = self.sync.cache();
            let mut node_cache = node_cache.lock().await;
            let mut pod_cache = self.pods_cache.lock().await;
            let pod_tombstones = pod_cache.sweep();
            let node_tombstones = node_cache.sweep();
            let count = pod_tombstones.len() + node_tombstones.len();
            (tombstone_records(node_tombstones, pod_tombstones, &node_cache), count)
        };
        let tombstones_delivered = self.sync.deliver(false, &tombstones).await;
        if tombstones_delivered {
            self.sync
                .metrics()
                .add_tombstones(ResourceKind::VirtualNode, tombstone_count);
        }

        self.sync
            .finish(
                started,
                CycleStats {
                    observed: nodes.len(),
                    full,
                    tombstones: tombstone_count,
                    live_delivered,
                    tombstones_delivered,
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::ResourceIdentifier;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn tombstone(uid: &str, cid: &str, parent: Option<&str>) -> Tombstone {
        Tombstone {
            uid: uid.to_string(),
            cid: cid.to_string(),
            parent: parent.map(str::to_string),
        }
    }

    #[test]
    fn test_project_virtual_node() {
        let mut allocatable = BTreeMap::new();
        allocatable.insert("cpu".to_string(), Quantity("8".to_string()));
        allocatable.insert("memory".to_string(), Quantity("32Gi".to_string()));
        let node = Node {
            metadata: ObjectMeta {
                name: Some("vk-1".to_string()),
                uid: Some("vn-1".to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                allocatable: Some(allocatable),
                addresses: Some(vec![NodeAddress {
                    address: "10.2.0.1".to_string(),
                    type_: "InternalIP".to_string(),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = project_virtual_node(&node, "c-1", "prod");
        assert_eq!(info.role, "<none>");
        assert_eq!(info.capacity, Some(NodeCapacity { cpu: "8".to_string(), memory: "32Gi".to_string() }));
        assert_eq!(info.addresses[0].address_type, "InternalIP");
        assert!(info.pods.is_empty());
        assert!(info.node_info.is_none());
    }

    #[test]
    fn test_pod_tombstones_follow_dead_node() {
        let records = tombstone_records(
            vec![tombstone("vn-1", "c-vn-1", None)],
            vec![tombstone("p-1", "c-p-1", Some("vn-1"))],
            &IdentifierCache::new(),
        );

        assert_eq!(records.len(), 1);
        assert!(!records[0].common.exist);
        assert_eq!(records[0].pods.len(), 1);
        assert_eq!(records[0].pods[0].common.uid, "p-1");
        assert!(!records[0].pods[0].common.exist);
    }

    #[test]
    fn test_pod_tombstones_ride_on_live_node_reference() {
        let mut nodes = IdentifierCache::new();
        nodes.observe(project_virtual_node(
            &Node {
                metadata: ObjectMeta {
                    uid: Some("vn-1".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            "",
            "",
        ));
        let mut acks = HashMap::new();
        acks.insert("vn-1".to_string(), "c-vn-1".to_string());
        nodes.acknowledge(&acks);

        let records = tombstone_records(
            Vec::new(),
            vec![
                tombstone("p-1", "c-p-1", Some("vn-1")),
                tombstone("p-2", "c-p-2", Some("gone")),
            ],
            &nodes,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].common.uid, "vn-1");
        assert_eq!(records[0].common.cid, "c-vn-1");
        assert!(records[0].common.exist);
        assert_eq!(records[0].pods[0].common.uid, "p-1");
        assert!(matches!(nodes.get("vn-1"), Some(ResourceIdentifier { curr: true, .. })));
    }
}
