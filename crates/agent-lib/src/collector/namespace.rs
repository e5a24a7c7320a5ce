//! Namespace collector

use super::base::{common_info, ResourceSync};
use super::{CollectorContext, CycleReport, ResourceCollector};
use crate::models::{NamespaceInfo, ResourceKind};
use crate::source::{cluster_api, LazySource, SourceParams};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use tracing::warn;

pub struct NamespaceCollector {
    sync: ResourceSync,
    source: LazySource<Namespace>,
}

impl NamespaceCollector {
    pub fn new(ctx: &CollectorContext) -> Self {
        Self::with_source(
            ctx.sync(ResourceKind::Namespace),
            ctx.cluster_source(ResourceKind::Namespace, SourceParams::default(), cluster_api::<Namespace>),
        )
    }

    pub fn with_source(sync: ResourceSync, source: LazySource<Namespace>) -> Self {
        Self { sync, source }
    }
}

#[async_trait]
impl ResourceCollector for NamespaceCollector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Namespace
    }

    async fn report(&self) -> CycleReport {
        let Some(store) = self.source.get() else {
            warn!(kind = %ResourceKind::Namespace, "Kubernetes client not enabled");
            return self.sync.skipped();
        };
        let snapshots = store
            .list()
            .iter()
            .map(|ns| NamespaceInfo {
                common: common_info(&ns.metadata),
            })
            .collect();
        self.sync.run_cycle(snapshots).await
    }
}
