//! Pod collector
//!
//! Pods are linked to the services and deployments selecting them, and to
//! their owning ReplicaSet or DaemonSet. Links are applied before the
//! snapshot is fingerprinted.

use super::base::{common_info, ResourceSync};
use super::links::{LinkKind, Linkable, SelectorSource};
use super::service::ServiceCollector;
use super::{CollectorContext, CycleReport, ResourceCollector};
use crate::metadata::AgentMetadata;
use crate::models::{PodInfo, ResourceKind};
use crate::source::{namespaced_api, LazySource, SourceParams};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use tracing::{debug, warn};

/// Static pods carry their stable identity in this annotation
pub const CONFIG_HASH_ANNOTATION: &str = "kubernetes.io/config.hash";

/// Status reason set when the node running the pod is unreachable
pub const NODE_UNREACHABLE_POD_REASON: &str = "NodeLost";

/// Config hash annotation if present, otherwise the API uid
pub fn pod_uid(pod: &Pod) -> String {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(CONFIG_HASH_ANNOTATION))
        .cloned()
        .or_else(|| pod.metadata.uid.clone())
        .unwrap_or_default()
}

/// Sum of container restart counts
pub fn restart_count(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0)
}

/// Display state in the format of the STATUS column of `kubectl get pods`
pub fn pod_state(pod: &Pod) -> String {
    let status = pod.status.as_ref();
    let status_reason = status.and_then(|s| s.reason.as_deref()).unwrap_or_default();

    let mut reason = if status_reason.is_empty() {
        status.and_then(|s| s.phase.clone()).unwrap_or_default()
    } else {
        status_reason.to_string()
    };

    let init_statuses = status
        .and_then(|s| s.init_container_statuses.as_deref())
        .unwrap_or_default();
    let init_containers = pod
        .spec
        .as_ref()
        .and_then(|s| s.init_containers.as_ref())
        .map_or(0, Vec::len);

    let mut initializing = false;
    for (i, container) in init_statuses.iter().enumerate() {
        let state = container.state.as_ref();
        let terminated = state.and_then(|s| s.terminated.as_ref());
        let waiting = state.and_then(|s| s.waiting.as_ref());

        match (terminated, waiting) {
            (Some(t), _) if t.exit_code == 0 => continue,
            (Some(t), _) => {
                reason = match t.reason.as_deref() {
                    Some(r) if !r.is_empty() => format!("Init:{r}"),
                    _ => match t.signal {
                        Some(signal) if signal != 0 => format!("Init:Signal:{signal}"),
                        _ => format!("Init:ExitCode:{}", t.exit_code),
                    },
                };
            }
            (None, Some(w))
                if w.reason.as_deref().map_or(false, |r| !r.is_empty() && r != "PodInitializing") =>
            {
                reason = format!("Init:{}", w.reason.as_deref().unwrap_or_default());
            }
            _ => {
                reason = format!("Init:{i}/{init_containers}");
            }
        }
        initializing = true;
        break;
    }

    if !initializing {
        let mut has_running = false;
        let statuses = status
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();

        for container in statuses.iter().rev() {
            let state = container.state.as_ref();
            let waiting_reason = state
                .and_then(|s| s.waiting.as_ref())
                .and_then(|w| w.reason.as_deref())
                .filter(|r| !r.is_empty());
            let terminated = state.and_then(|s| s.terminated.as_ref());

            if let Some(r) = waiting_reason {
                reason = r.to_string();
            } else if let Some(t) = terminated {
                reason = match t.reason.as_deref() {
                    Some(r) if !r.is_empty() => r.to_string(),
                    _ => match t.signal {
                        Some(signal) if signal != 0 => format!("Signal:{signal}"),
                        _ => format!("ExitCode:{}", t.exit_code),
                    },
                };
            } else if container.ready && state.and_then(|s| s.running.as_ref()).is_some() {
                has_running = true;
            }
        }

        // a completed container next to a ready one means the pod still runs
        if reason == "Completed" && has_running {
            reason = "Running".to_string();
        }
    }

    if pod.metadata.deletion_timestamp.is_some() {
        if status_reason == NODE_UNREACHABLE_POD_REASON {
            reason = "Unknown".to_string();
        } else {
            reason = "Terminating".to_string();
        }
    }

    reason
}

/// Pod snapshot with owner links; selector links are applied separately
pub fn project_pod(pod: &Pod) -> PodInfo {
    let mut common = common_info(&pod.metadata);
    common.uid = pod_uid(pod);

    let mut info = PodInfo {
        common,
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        ip: pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .unwrap_or_default(),
        restart_count: restart_count(pod),
        state: pod_state(pod),
        ..Default::default()
    };

    for owner in pod.metadata.owner_references.iter().flatten() {
        match owner.kind.as_str() {
            "ReplicaSet" => info.set_link(LinkKind::ReplicaSet, &owner.uid),
            "DaemonSet" => info.set_link(LinkKind::DaemonSet, &owner.uid),
            _ => {}
        }
    }
    info
}

/// Agent service lookup feeding [`AgentMetadata`]
struct AgentService {
    name: String,
    metadata: AgentMetadata,
}

pub struct PodCollector {
    sync: ResourceSync,
    source: LazySource<Pod>,
    services: Arc<ServiceCollector>,
    selector_sources: Vec<Arc<dyn SelectorSource>>,
    agent_service: Option<AgentService>,
}

impl PodCollector {
    pub fn new(
        ctx: &CollectorContext,
        services: Arc<ServiceCollector>,
        deployments: Option<Arc<dyn SelectorSource>>,
    ) -> Self {
        let mut collector = Self::with_source(
            ctx.sync(ResourceKind::Pod),
            ctx.namespaced_source(ResourceKind::Pod, SourceParams::default(), namespaced_api::<Pod>),
            services,
        )
        .with_agent_service(ctx.agent_service_name.clone(), ctx.metadata.clone());
        if let Some(deployments) = deployments {
            collector = collector.with_selector_source(deployments);
        }
        collector
    }

    pub fn with_source(sync: ResourceSync, source: LazySource<Pod>, services: Arc<ServiceCollector>) -> Self {
        Self {
            sync,
            source,
            selector_sources: vec![Arc::clone(&services) as Arc<dyn SelectorSource>],
            services,
            agent_service: None,
        }
    }

    /// Also link pods selected by `source`
    pub fn with_selector_source(mut self, source: Arc<dyn SelectorSource>) -> Self {
        self.selector_sources.push(source);
        self
    }

    /// Publish the external IP of service `name` to `metadata` each cycle
    pub fn with_agent_service(mut self, name: impl Into<String>, metadata: AgentMetadata) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.agent_service = Some(AgentService { name, metadata });
        }
        self
    }

    async fn update_agent_external_ip(&self) {
        let Some(agent) = &self.agent_service else {
            return;
        };
        match self.services.agent_external_ip(&agent.name) {
            Some(ip) => {
                agent.metadata.set_external_ip(&ip).await;
            }
            None => debug!(service = %agent.name, "Agent service has no usable external IP"),
        }
    }
}

#[async_trait]
impl ResourceCollector for PodCollector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pod
    }

    async fn report(&self) -> CycleReport {
        let Some(store) = self.source.get() else {
            warn!(kind = %ResourceKind::Pod, "Kubernetes client not enabled");
            return self.sync.skipped();
        };

        let mut matchers = Vec::new();
        for source in &self.selector_sources {
            matchers.extend(source.refresh_selectors().await);
        }
        self.update_agent_external_ip().await;

        let snapshots: Vec<PodInfo> = store
            .list()
            .iter()
            .map(|pod| {
                let mut info = project_pod(pod);
                for matcher in &matchers {
                    matcher.apply(&mut info);
                }
                info
            })
            .collect();
        debug!(pods = snapshots.len(), links = matchers.len(), "Projected pods");

        self.sync.run_cycle(snapshots).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
        ContainerStatus, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
    use std::collections::BTreeMap;

    fn waiting(reason: &str) -> ContainerState {
        ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: None,
            }),
            ..Default::default()
        }
    }

    fn terminated(exit_code: i32, reason: Option<&str>, signal: Option<i32>) -> ContainerState {
        ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code,
                reason: reason.map(str::to_string),
                signal,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn running() -> ContainerState {
        ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }
    }

    fn container(state: ContainerState, ready: bool, restarts: i32) -> ContainerStatus {
        ContainerStatus {
            name: "c".to_string(),
            state: Some(state),
            ready,
            restart_count: restarts,
            ..Default::default()
        }
    }

    fn pod(phase: &str, init: Vec<ContainerStatus>, containers: Vec<ContainerStatus>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                init_containers: Some(vec![Default::default(); init.len()]),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                init_container_statuses: Some(init),
                container_statuses: Some(containers),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_running_pod_state() {
        let p = pod("Running", vec![], vec![container(running(), true, 0)]);
        assert_eq!(pod_state(&p), "Running");
    }

    #[test]
    fn test_waiting_reason_wins() {
        let p = pod(
            "Running",
            vec![],
            vec![container(running(), true, 0), container(waiting("CrashLoopBackOff"), false, 4)],
        );
        assert_eq!(pod_state(&p), "CrashLoopBackOff");
        assert_eq!(restart_count(&p), 4);
    }

    #[test]
    fn test_completed_with_running_container_is_running() {
        let p = pod(
            "Running",
            vec![],
            vec![container(terminated(0, Some("Completed"), None), false, 0), container(running(), true, 0)],
        );
        assert_eq!(pod_state(&p), "Running");
    }

    #[test]
    fn test_terminated_without_reason() {
        let p = pod("Failed", vec![], vec![container(terminated(137, None, Some(9)), false, 0)]);
        assert_eq!(pod_state(&p), "Signal:9");

        let p = pod("Failed", vec![], vec![container(terminated(2, None, None), false, 0)]);
        assert_eq!(pod_state(&p), "ExitCode:2");
    }

    #[test]
    fn test_init_container_states() {
        let p = pod(
            "Pending",
            vec![container(terminated(1, None, None), false, 0)],
            vec![container(waiting("PodInitializing"), false, 0)],
        );
        assert_eq!(pod_state(&p), "Init:ExitCode:1");

        let p = pod(
            "Pending",
            vec![container(waiting("ImagePullBackOff"), false, 0)],
            vec![],
        );
        assert_eq!(pod_state(&p), "Init:ImagePullBackOff");

        let p = pod(
            "Pending",
            vec![
                container(terminated(0, Some("Completed"), None), false, 0),
                container(running(), false, 0),
            ],
            vec![],
        );
        assert_eq!(pod_state(&p), "Init:1/2");
    }

    #[test]
    fn test_deleted_pod_state() {
        let mut p = pod("Running", vec![], vec![container(running(), true, 0)]);
        p.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(pod_state(&p), "Terminating");

        if let Some(status) = p.status.as_mut() {
            status.reason = Some(NODE_UNREACHABLE_POD_REASON.to_string());
        }
        assert_eq!(pod_state(&p), "Unknown");
    }

    #[test]
    fn test_project_pod_identity_and_owners() {
        let mut annotations = BTreeMap::new();
        annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), "hash-1".to_string());
        let p = Pod {
            metadata: ObjectMeta {
                name: Some("etcd".to_string()),
                namespace: Some("kube-system".to_string()),
                uid: Some("api-uid".to_string()),
                annotations: Some(annotations),
                owner_references: Some(vec![
                    OwnerReference {
                        kind: "ReplicaSet".to_string(),
                        uid: "rs-1".to_string(),
                        ..Default::default()
                    },
                    OwnerReference {
                        kind: "DaemonSet".to_string(),
                        uid: "ds-1".to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            },
            status: Some(PodStatus {
                pod_ip: Some("10.1.0.4".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = project_pod(&p);
        assert_eq!(info.common.uid, "hash-1");
        assert_eq!(info.replicaset_uid, "rs-1");
        assert_eq!(info.daemonset_uid, "ds-1");
        assert_eq!(info.ip, "10.1.0.4");
        assert_eq!(info.namespace, "kube-system");
    }
}
