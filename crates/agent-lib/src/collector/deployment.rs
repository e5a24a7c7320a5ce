//! Deployment collector

use super::base::{common_info, ResourceSync};
use super::links::{build_links, LinkKind, LinkMatcher, Selector, SelectorSet, SelectorSource};
use super::{CollectorContext, CycleReport, ResourceCollector};
use crate::models::{DeploymentInfo, ResourceKind};
use crate::source::{namespaced_api, LazySource, SourceParams};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use tracing::warn;

pub fn project_deployment(deployment: &Deployment) -> DeploymentInfo {
    let spec = deployment.spec.as_ref();
    let status = deployment.status.as_ref();
    DeploymentInfo {
        common: common_info(&deployment.metadata),
        namespace: deployment.metadata.namespace.clone().unwrap_or_default(),
        available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        // the API server defaults an unset replica count to one
        replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
        observed_generation: status.and_then(|s| s.observed_generation).unwrap_or(0),
        ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
        strategy: spec
            .and_then(|s| s.strategy.as_ref())
            .and_then(|s| s.type_.clone())
            .unwrap_or_default(),
        unavailable_replicas: status.and_then(|s| s.unavailable_replicas).unwrap_or(0),
    }
}

pub struct DeploymentCollector {
    sync: ResourceSync,
    source: LazySource<Deployment>,
    selectors: SelectorSet,
}

impl DeploymentCollector {
    pub fn new(ctx: &CollectorContext) -> Self {
        Self::with_source(
            ctx.sync(ResourceKind::Deployment),
            ctx.namespaced_source(
                ResourceKind::Deployment,
                SourceParams::default(),
                namespaced_api::<Deployment>,
            ),
        )
    }

    pub fn with_source(sync: ResourceSync, source: LazySource<Deployment>) -> Self {
        Self {
            sync,
            source,
            selectors: SelectorSet::new(),
        }
    }
}

#[async_trait]
impl SelectorSource for DeploymentCollector {
    async fn refresh_selectors(&self) -> Vec<LinkMatcher> {
        let Some(store) = self.source.get() else {
            return self.selectors.snapshot().await;
        };

        let matchers: Vec<LinkMatcher> = store
            .list()
            .iter()
            .filter_map(|deployment| {
                let selector = Selector::from_label_selector(&deployment.spec.as_ref()?.selector)?;
                build_links(
                    deployment.metadata.namespace.as_deref().unwrap_or_default(),
                    selector,
                    LinkKind::Deployment,
                    deployment.metadata.uid.as_deref().unwrap_or_default(),
                )
            })
            .collect();

        self.selectors.replace(matchers.clone()).await;
        matchers
    }
}

#[async_trait]
impl ResourceCollector for DeploymentCollector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Deployment
    }

    async fn report(&self) -> CycleReport {
        let Some(store) = self.source.get() else {
            warn!(kind = %ResourceKind::Deployment, "Kubernetes client not enabled");
            return self.sync.skipped();
        };
        let snapshots = store.list().iter().map(|d| project_deployment(d)).collect();
        self.sync.run_cycle(snapshots).await
    }
}
