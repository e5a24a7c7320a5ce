//! Report scheduling
//!
//! Runs every collector once in dependency order, then keeps one periodic
//! task per collector until shutdown. Collectors can also be triggered out
//! of band.

use super::{CycleReport, ResourceCollector};
use crate::health::{components, HealthRegistry};
use crate::models::ResourceKind;
use crate::observability::StructuredLogger;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduling parameters
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base period between cycles of one kind (default: 10 seconds)
    pub interval: Duration,
    /// Maximum jitter added to each period (default: 1 second)
    pub jitter: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
        }
    }
}

/// Scheduler over a fixed, ordered set of collectors
#[derive(Clone)]
pub struct SyncLoop {
    collectors: Arc<Vec<Arc<dyn ResourceCollector>>>,
    config: SyncConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl SyncLoop {
    /// Kinds in execution order
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.collectors.iter().map(|c| c.kind()).collect()
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            kinds = self.collectors.len(),
            "Starting sync loop"
        );
        if let Some(health) = &self.health {
            health.set_healthy(components::SCHEDULER).await;
        }

        // first pass in order so link targets are cached before dependents
        for collector in self.collectors.iter() {
            if shutdown.is_cancelled() {
                info!("Shutting down sync loop");
                return;
            }
            self.execute(collector.as_ref()).await;
        }

        let mut tasks = JoinSet::new();
        for collector in self.collectors.iter() {
            tasks.spawn(self.clone().run_collector(Arc::clone(collector), shutdown.clone()));
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Collector task failed");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::SCHEDULER, format!("collector task failed: {e}"))
                        .await;
                }
            }
        }
        info!("Shutting down sync loop");
    }

    async fn run_collector(self, collector: Arc<dyn ResourceCollector>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(kind = %collector.kind(), "Collector task stopped");
                    break;
                }
                _ = tokio::time::sleep(self.current_interval()) => {
                    self.execute(collector.as_ref()).await;
                }
            }
        }
    }

    /// Run every collector once, in order
    pub async fn run_once(&self) -> Vec<CycleReport> {
        let mut reports = Vec::with_capacity(self.collectors.len());
        for collector in self.collectors.iter() {
            reports.push(self.execute(collector.as_ref()).await);
        }
        reports
    }

    /// Run the collector for `kind` out of band; `None` if it is not scheduled
    pub async fn trigger(&self, kind: ResourceKind) -> Option<CycleReport> {
        let collector = self.collectors.iter().find(|c| c.kind() == kind)?;
        info!(kind = %kind, "Triggered sync cycle");
        Some(self.execute(collector.as_ref()).await)
    }

    async fn execute(&self, collector: &dyn ResourceCollector) -> CycleReport {
        let report = collector.report().await;
        if let Some(logger) = &self.logger {
            logger.log_cycle(&report);
        }
        if let Some(health) = &self.health {
            health.record_cycle(&report).await;
        }
        report
    }

    fn current_interval(&self) -> Duration {
        let jitter_ms = rand_jitter(self.config.jitter.as_millis() as u64);
        self.config.interval + Duration::from_millis(jitter_ms)
    }
}

/// Jitter in `[0, max_ms)` derived from the clock
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    now % max_ms
}

/// Builder for [`SyncLoop`]
pub struct SyncLoopBuilder {
    collectors: Vec<Arc<dyn ResourceCollector>>,
    config: SyncConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl SyncLoopBuilder {
    pub fn new() -> Self {
        Self {
            collectors: Vec::new(),
            config: SyncConfig::default(),
            health: None,
            logger: None,
        }
    }

    /// Append collectors; execution follows insertion order
    pub fn collectors(mut self, collectors: impl IntoIterator<Item = Arc<dyn ResourceCollector>>) -> Self {
        self.collectors.extend(collectors);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn ResourceCollector>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<SyncLoop> {
        if self.collectors.is_empty() {
            anyhow::bail!("At least one collector is required");
        }
        if self.config.interval.is_zero() {
            anyhow::bail!("Sync interval must be positive");
        }
        Ok(SyncLoop {
            collectors: Arc::new(self.collectors),
            config: self.config,
            health: self.health,
            logger: self.logger,
        })
    }
}

impl Default for SyncLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
