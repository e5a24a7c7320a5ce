//! ReplicaSet collector

use super::base::{common_info, owner_uid, ResourceSync};
use super::{CollectorContext, CycleReport, ResourceCollector};
use crate::models::{ReplicaSetInfo, ResourceKind};
use crate::source::{namespaced_api, LazySource, SourceParams};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use tracing::warn;

pub fn project_replicaset(rs: &ReplicaSet) -> ReplicaSetInfo {
    let status = rs.status.as_ref();
    ReplicaSetInfo {
        common: common_info(&rs.metadata),
        namespace: rs.metadata.namespace.clone().unwrap_or_default(),
        available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        replicas: status.map(|s| s.replicas).unwrap_or(0),
        observed_generation: status.and_then(|s| s.observed_generation).unwrap_or(0),
        ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        deployment_uid: owner_uid(&rs.metadata, "Deployment").unwrap_or_default(),
    }
}

pub struct ReplicaSetCollector {
    sync: ResourceSync,
    source: LazySource<ReplicaSet>,
}

impl ReplicaSetCollector {
    pub fn new(ctx: &CollectorContext) -> Self {
        Self::with_source(
            ctx.sync(ResourceKind::ReplicaSet),
            ctx.namespaced_source(
                ResourceKind::ReplicaSet,
                SourceParams::default(),
                namespaced_api::<ReplicaSet>,
            ),
        )
    }

    pub fn with_source(sync: ResourceSync, source: LazySource<ReplicaSet>) -> Self {
        Self { sync, source }
    }
}

#[async_trait]
impl ResourceCollector for ReplicaSetCollector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ReplicaSet
    }

    async fn report(&self) -> CycleReport {
        let Some(store) = self.source.get() else {
            warn!(kind = %ResourceKind::ReplicaSet, "Kubernetes client not enabled");
            return self.sync.skipped();
        };
        let snapshots = store.list().iter().map(|rs| project_replicaset(rs)).collect();
        self.sync.run_cycle(snapshots).await
    }
}
