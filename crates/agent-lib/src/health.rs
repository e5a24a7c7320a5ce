//! Health check infrastructure for the cluster agent
//!
//! Components are the watch sources, the reporter and the scheduler. Sync
//! cycle outcomes are folded in per resource kind: a component stays
//! degraded while any kind is failing on it.

use crate::collector::{CycleOutcome, CycleReport};
use crate::models::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Compute overall status from component statuses
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    /// Cluster watch sources; degraded while a kind has no source
    pub const WATCH_SOURCE: &str = "watch_source";
    /// Delivery to the control plane
    pub const REPORTER: &str = "reporter";
    pub const SCHEDULER: &str = "scheduler";
}

/// Health registry for tracking component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    failing: Arc<RwLock<HashMap<&'static str, BTreeSet<ResourceKind>>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            failing: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Update component health status
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    /// Mark component as healthy
    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    /// Mark component as degraded
    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    /// Mark component as unhealthy
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Fold one cycle outcome into the watch source and reporter status
    pub async fn record_cycle(&self, report: &CycleReport) {
        let (source_ok, reporter_ok) = match &report.outcome {
            CycleOutcome::Skipped => (false, true),
            CycleOutcome::Completed(stats) => (true, stats.delivered()),
        };
        self.track(components::WATCH_SOURCE, report.kind, source_ok, "sources unavailable")
            .await;
        self.track(components::REPORTER, report.kind, reporter_ok, "reports failing")
            .await;
    }

    /// Unhealthy components are set explicitly and are not cleared here
    async fn track(&self, component: &'static str, kind: ResourceKind, ok: bool, problem: &str) {
        let kinds = {
            let mut failing = self.failing.write().await;
            let kinds = failing.entry(component).or_default();
            if ok {
                kinds.remove(&kind);
            } else {
                kinds.insert(kind);
            }
            kinds.iter().map(|k| k.resource_name()).collect::<Vec<_>>()
        };

        let unhealthy = self
            .components
            .read()
            .await
            .get(component)
            .is_some_and(|health| health.status == ComponentStatus::Unhealthy);
        if unhealthy {
            return;
        }

        if kinds.is_empty() {
            self.set_healthy(component).await;
        } else {
            self.set_degraded(component, format!("{problem}: {}", kinds.join(",")))
                .await;
        }
    }

    /// Set readiness status
    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Get readiness response
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let critical_healthy = health.status != ComponentStatus::Unhealthy;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Agent not yet initialized".to_string()),
            }
        } else if !critical_healthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CycleStats;

    fn delivered() -> CycleStats {
        CycleStats {
            live_delivered: true,
            tombstones_delivered: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_registered_components_start_healthy() {
        let registry = HealthRegistry::new();
        assert!(registry.health().await.components.is_empty());

        registry.register(components::WATCH_SOURCE).await;
        registry.register(components::REPORTER).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(
            health.components[components::REPORTER].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_overall_status_takes_worst_component() {
        let registry = HealthRegistry::new();
        registry.register(components::WATCH_SOURCE).await;
        registry.register(components::REPORTER).await;

        registry.set_degraded(components::REPORTER, "reports failing: pods").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_unhealthy(components::WATCH_SOURCE, "No Kubernetes client").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::WATCH_SOURCE).await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Agent not yet initialized"));

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::WATCH_SOURCE, "No Kubernetes client").await;
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_cycle_outcomes_tracked_per_kind() {
        let registry = HealthRegistry::new();
        registry.record_cycle(&CycleReport::skipped(ResourceKind::Pod)).await;
        registry.record_cycle(&CycleReport::skipped(ResourceKind::Node)).await;

        let health = registry.health().await;
        let source = &health.components[components::WATCH_SOURCE];
        assert_eq!(source.status, ComponentStatus::Degraded);
        assert_eq!(source.message.as_deref(), Some("sources unavailable: pods,nodes"));
        assert_eq!(health.components[components::REPORTER].status, ComponentStatus::Healthy);

        registry
            .record_cycle(&CycleReport::completed(ResourceKind::Pod, delivered()))
            .await;
        let health = registry.health().await;
        assert_eq!(
            health.components[components::WATCH_SOURCE].message.as_deref(),
            Some("sources unavailable: nodes")
        );

        registry
            .record_cycle(&CycleReport::completed(ResourceKind::Node, delivered()))
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);

        registry
            .record_cycle(&CycleReport::completed(ResourceKind::Service, CycleStats::default()))
            .await;
        let health = registry.health().await;
        assert_eq!(health.components[components::REPORTER].status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_cycles_do_not_clear_unhealthy() {
        let registry = HealthRegistry::new();
        registry.set_unhealthy(components::WATCH_SOURCE, "No Kubernetes client").await;

        registry.record_cycle(&CycleReport::skipped(ResourceKind::Pod)).await;
        registry
            .record_cycle(&CycleReport::completed(ResourceKind::Pod, delivered()))
            .await;

        let health = registry.health().await;
        assert_eq!(
            health.components[components::WATCH_SOURCE].status,
            ComponentStatus::Unhealthy
        );
    }
}
