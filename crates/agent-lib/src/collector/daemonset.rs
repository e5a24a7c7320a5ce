//! DaemonSet collector

use super::base::{common_info, ResourceSync};
use super::{CollectorContext, CycleReport, ResourceCollector};
use crate::models::{DaemonSetInfo, ResourceKind};
use crate::source::{namespaced_api, LazySource, SourceParams};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use tracing::warn;

pub fn project_daemonset(ds: &DaemonSet) -> DaemonSetInfo {
    let status = ds.status.as_ref();
    DaemonSetInfo {
        common: common_info(&ds.metadata),
        namespace: ds.metadata.namespace.clone().unwrap_or_default(),
        current_number_scheduled: status.map(|s| s.current_number_scheduled).unwrap_or(0),
        desired_number_scheduled: status.map(|s| s.desired_number_scheduled).unwrap_or(0),
        number_available: status.and_then(|s| s.number_available).unwrap_or(0),
        number_misscheduled: status.map(|s| s.number_misscheduled).unwrap_or(0),
        number_ready: status.map(|s| s.number_ready).unwrap_or(0),
        observed_generation: status.and_then(|s| s.observed_generation).unwrap_or(0),
        updated_number_scheduled: status.and_then(|s| s.updated_number_scheduled).unwrap_or(0),
        update_strategy: ds
            .spec
            .as_ref()
            .and_then(|s| s.update_strategy.as_ref())
            .and_then(|s| s.type_.clone())
            .unwrap_or_default(),
    }
}

pub struct DaemonSetCollector {
    sync: ResourceSync,
    source: LazySource<DaemonSet>,
}

impl DaemonSetCollector {
    pub fn new(ctx: &CollectorContext) -> Self {
        Self::with_source(
            ctx.sync(ResourceKind::DaemonSet),
            ctx.namespaced_source(
                ResourceKind::DaemonSet,
                SourceParams::default(),
                namespaced_api::<DaemonSet>,
            ),
        )
    }

    pub fn with_source(sync: ResourceSync, source: LazySource<DaemonSet>) -> Self {
        Self { sync, source }
    }
}

#[async_trait]
impl ResourceCollector for DaemonSetCollector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::DaemonSet
    }

    async fn report(&self) -> CycleReport {
        let Some(store) = self.source.get() else {
            warn!(kind = %ResourceKind::DaemonSet, "Kubernetes client not enabled");
            return self.sync.skipped();
        };
        let snapshots = store.list().iter().map(|ds| project_daemonset(ds)).collect();
        self.sync.run_cycle(snapshots).await
    }
}
