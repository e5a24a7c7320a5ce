//! Snapshot data models reported to the control plane
//!
//! Every watched resource kind is projected into a compact snapshot that
//! embeds [`CommonInfo`]. Maps are `BTreeMap` so the serialized form, and
//! therefore the fingerprint, is stable across cycles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resource kinds tracked by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Namespace,
    Service,
    Deployment,
    ReplicaSet,
    DaemonSet,
    Pod,
    Ingress,
    Node,
    VirtualNode,
}

impl ResourceKind {
    /// All kinds in dependency order
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Namespace,
        ResourceKind::Service,
        ResourceKind::Deployment,
        ResourceKind::ReplicaSet,
        ResourceKind::DaemonSet,
        ResourceKind::Pod,
        ResourceKind::Ingress,
        ResourceKind::Node,
        ResourceKind::VirtualNode,
    ];

    /// Resource name used as payload key and in acknowledgements
    pub fn resource_name(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespaces",
            ResourceKind::Service => "services",
            ResourceKind::Deployment => "deployments",
            ResourceKind::ReplicaSet => "replicasets",
            ResourceKind::DaemonSet => "daemonsets",
            ResourceKind::Pod => "pods",
            ResourceKind::Ingress => "ingresses",
            ResourceKind::Node => "nodes",
            ResourceKind::VirtualNode => "virtualNodes",
        }
    }

    /// Server-side handler receiving batches of this kind
    pub fn handler(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "k8sNamespace",
            ResourceKind::Service => "k8sService",
            ResourceKind::Deployment => "k8sDeployment",
            ResourceKind::ReplicaSet => "k8sReplicaSet",
            ResourceKind::DaemonSet => "k8sDaemonset",
            ResourceKind::Pod => "k8sPod",
            ResourceKind::Ingress => "k8sIngress",
            ResourceKind::Node => "k8sNode",
            ResourceKind::VirtualNode => "k8sVirtualNode",
        }
    }

    /// Parse a resource name (`pods`, `services`, ...)
    pub fn from_resource_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.resource_name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_name())
    }
}

/// Fields shared by every snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonInfo {
    pub uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_time: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub exist: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cid: String,
}

impl CommonInfo {
    /// Reference record carrying only identity, existence and Cid
    pub fn reference(uid: impl Into<String>, cid: impl Into<String>, exist: bool) -> Self {
        Self {
            uid: uid.into(),
            cid: cid.into(),
            exist,
            ..Default::default()
        }
    }
}

/// Counters are omitted when zero so reference records stay minimal
fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Behavior shared by all snapshot types
pub trait Snapshot: Serialize + Clone + Default + Send + Sync + 'static {
    fn common(&self) -> &CommonInfo;

    fn common_mut(&mut self) -> &mut CommonInfo;

    fn uid(&self) -> &str {
        &self.common().uid
    }

    /// Name stored in the identifier cache
    fn cache_name(&self) -> String {
        self.common().name.clone()
    }

    /// Snapshot reduced to `{uid, exist, cid}`
    fn reference(uid: &str, cid: &str, exist: bool) -> Self {
        let mut snapshot = Self::default();
        *snapshot.common_mut() = CommonInfo::reference(uid, cid, exist);
        snapshot
    }
}

macro_rules! impl_snapshot {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Snapshot for $ty {
                fn common(&self) -> &CommonInfo {
                    &self.common
                }

                fn common_mut(&mut self) -> &mut CommonInfo {
                    &mut self.common
                }
            }
        )*
    };
}

/// Pod snapshot with relationship links
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    #[serde(flatten)]
    pub common: CommonInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub restart_count: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub daemonset_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replicaset_uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    #[serde(flatten)]
    pub common: CommonInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_ip: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "type")]
    pub service_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
}

impl Snapshot for ServiceInfo {
    fn common(&self) -> &CommonInfo {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonInfo {
        &mut self.common
    }

    // Ingress backends resolve services within their own namespace
    fn cache_name(&self) -> String {
        format!("{}/{}", self.namespace, self.common.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    #[serde(flatten)]
    pub common: CommonInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub available_replicas: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ready_replicas: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub updated_replicas: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub unavailable_replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetInfo {
    #[serde(flatten)]
    pub common: CommonInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub available_replicas: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ready_replicas: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment_uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSetInfo {
    #[serde(flatten)]
    pub common: CommonInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub current_number_scheduled: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub desired_number_scheduled: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub number_available: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub number_misscheduled: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub number_ready: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub updated_number_scheduled: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_strategy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceInfo {
    #[serde(flatten)]
    pub common: CommonInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(flatten)]
    pub common: CommonInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
}

/// Ingress snapshot. Field keys follow the control plane's ingress schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressInfo {
    #[serde(flatten)]
    pub common: CommonInfo,
    #[serde(rename = "Namespace", default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(rename = "Address", default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(rename = "Annotations", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(rename = "Tls", default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<IngressTlsInfo>,
    #[serde(rename = "Rules", default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<IngressRuleInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressTlsInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRuleInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    pub http: HttpRuleInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRuleInfo {
    pub paths: Vec<HttpPathInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub backend: IngressBackendInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressBackendInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_uid: String,
}

/// Virtual node snapshot carrying the pods scheduled onto it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNodeInfo {
    #[serde(flatten)]
    pub common: CommonInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_info: Option<NodeSystemInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<NodeCapacity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddressInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pods: Vec<PodInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSystemInfo {
    pub architecture: String,
    pub container_runtime_version: String,
    pub kernel_version: String,
    pub kube_proxy_version: String,
    pub kubelet_version: String,
    pub operating_system: String,
    pub os_image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCapacity {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddressInfo {
    #[serde(rename = "type")]
    pub address_type: String,
    pub address: String,
}

impl_snapshot!(
    PodInfo,
    DeploymentInfo,
    ReplicaSetInfo,
    DaemonSetInfo,
    NamespaceInfo,
    NodeInfo,
    IngressInfo,
    VirtualNodeInfo,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_resource_name(kind.resource_name()), Some(kind));
        }
        assert_eq!(ResourceKind::from_resource_name("widgets"), None);
        assert_eq!(ResourceKind::Pod.handler(), "k8sPod");
        assert_eq!(ResourceKind::VirtualNode.to_string(), "virtualNodes");
    }

    #[test]
    fn test_reference_snapshot_serializes_minimal_fields() {
        let pod = PodInfo::reference("uid-1", "cid-1", true);
        let value = serde_json::to_value(&pod).unwrap();

        assert_eq!(
            value,
            serde_json::json!({"uid": "uid-1", "exist": true, "cid": "cid-1"})
        );
    }

    #[test]
    fn test_tombstone_carries_no_counters() {
        let deployment = DeploymentInfo::reference("d-1", "c-1", false);
        let value = serde_json::to_value(&deployment).unwrap();
        assert_eq!(value, serde_json::json!({"uid": "d-1", "exist": false, "cid": "c-1"}));

        let daemonset = DaemonSetInfo::reference("ds-1", "c-2", false);
        assert_eq!(
            serde_json::to_value(&daemonset).unwrap(),
            serde_json::json!({"uid": "ds-1", "exist": false, "cid": "c-2"})
        );
    }

    #[test]
    fn test_nonzero_counters_serialized() {
        let mut rs = ReplicaSetInfo::reference("rs-1", "", true);
        rs.replicas = 3;
        let value = serde_json::to_value(&rs).unwrap();
        assert_eq!(value["replicas"], 3);
        assert!(value.get("readyReplicas").is_none());
    }

    #[test]
    fn test_tombstone_omits_empty_cid() {
        let ns = NamespaceInfo::reference("uid-2", "", false);
        let value = serde_json::to_value(&ns).unwrap();
        assert_eq!(value, serde_json::json!({"uid": "uid-2", "exist": false}));
    }

    #[test]
    fn test_service_cache_name_is_namespace_qualified() {
        let mut svc = ServiceInfo::default();
        svc.common.name = "web".to_string();
        svc.namespace = "shop".to_string();
        assert_eq!(svc.cache_name(), "shop/web");
    }

    #[test]
    fn test_ingress_uses_capitalized_keys() {
        let mut ingress = IngressInfo::default();
        ingress.common.uid = "i-1".to_string();
        ingress.namespace = "default".to_string();
        ingress.address = "10.0.0.1".to_string();

        let value = serde_json::to_value(&ingress).unwrap();
        assert_eq!(value["Namespace"], "default");
        assert_eq!(value["Address"], "10.0.0.1");
        assert!(value.get("Rules").is_none());
    }
}
