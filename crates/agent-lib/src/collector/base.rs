//! Shared collect/diff/report/sweep machinery

use super::{CycleReport, CycleStats};
use crate::identifier::IdentifierCache;
use crate::models::{CommonInfo, ResourceKind, Snapshot};
use crate::observability::{caches, AgentMetrics};
use crate::sync::{Acks, ReportBatch, Reporter};
use chrono::SecondsFormat;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Identifier cache shared between collectors
pub type SharedCache = Arc<Mutex<IdentifierCache>>;

/// `CommonInfo` for a live object
pub fn common_info(meta: &ObjectMeta) -> CommonInfo {
    CommonInfo {
        uid: meta.uid.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        created_time: meta
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        exist: true,
        cid: String::new(),
    }
}

/// Uid of the first owner reference of `kind`
pub fn owner_uid(meta: &ObjectMeta, kind: &str) -> Option<String> {
    meta.owner_references
        .iter()
        .flatten()
        .find(|owner| owner.kind == kind)
        .map(|owner| owner.uid.clone())
}

/// Per-kind report state: identifier caches plus the reporter
pub struct ResourceSync {
    kind: ResourceKind,
    reporter: Arc<dyn Reporter>,
    cache: SharedCache,
    secondary: Option<SharedCache>,
    /// Held for a whole cycle so a triggered cycle cannot interleave with
    /// a scheduled one between diff and sweep
    cycle: Mutex<()>,
    metrics: AgentMetrics,
}

impl ResourceSync {
    pub fn new(kind: ResourceKind, reporter: Arc<dyn Reporter>, metrics: AgentMetrics) -> Self {
        Self {
            kind,
            reporter,
            cache: Arc::new(Mutex::new(IdentifierCache::new())),
            secondary: None,
            cycle: Mutex::new(()),
            metrics,
        }
    }

    /// Attach a second cache for nested records; acks and resets apply to both
    pub fn with_secondary_cache(mut self, cache: SharedCache) -> Self {
        self.secondary = Some(cache);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn cache(&self) -> SharedCache {
        Arc::clone(&self.cache)
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    /// Exclusive access to this kind's cycle; hold it from diff until the
    /// tombstones are delivered
    pub async fn begin_cycle(&self) -> MutexGuard<'_, ()> {
        self.cycle.lock().await
    }

    /// Diff snapshots against the cache; returns the emitted records and
    /// how many of them are full snapshots
    pub async fn diff<S: Snapshot>(&self, snapshots: Vec<S>) -> (Vec<S>, usize) {
        let mut cache = self.cache.lock().await;
        let mut full = 0;
        let emitted = snapshots
            .into_iter()
            .map(|snapshot| {
                let observation = cache.observe(snapshot);
                if observation.is_full() {
                    full += 1;
                }
                observation.snapshot
            })
            .collect();
        (emitted, full)
    }

    /// Sweep the primary cache into tombstone records
    pub async fn sweep<S: Snapshot>(&self) -> Vec<S> {
        let tombstones = self.cache.lock().await.sweep();
        tombstones
            .iter()
            .map(|t| S::reference(&t.uid, &t.cid, false))
            .collect()
    }

    /// Send one batch. Empty batches are not sent. Any failure resets the
    /// caches; returns whether the batch was delivered.
    pub async fn deliver<T: Serialize + Sync>(&self, exists: bool, records: &[T]) -> bool {
        if records.is_empty() {
            return true;
        }

        let batch = match ReportBatch::encode(self.kind, exists, records) {
            Ok(batch) => batch,
            Err(e) => {
                self.fail(exists, &e.to_string()).await;
                return false;
            }
        };

        let started = Instant::now();
        let result = self.reporter.report(batch).await;
        self.metrics
            .observe_report_latency(self.kind, started.elapsed().as_secs_f64());

        let outcome = match result {
            Err(e) => Err(e.to_string()),
            Ok(response) if !response.success => Err(format!(
                "report rejected with code {}: {}",
                response.code, response.error
            )),
            Ok(response) if exists => match Acks::parse(self.kind, response.result.as_ref()) {
                Ok(acks) => {
                    self.acknowledge(&acks).await;
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            },
            Ok(_) => Ok(()),
        };

        match outcome {
            Ok(()) => {
                info!(kind = %self.kind, exists, size = records.len(), "Report delivered");
                self.metrics.inc_report(self.kind, exists, true);
                true
            }
            Err(reason) => {
                self.fail(exists, &reason).await;
                false
            }
        }
    }

    async fn fail(&self, exists: bool, reason: &str) {
        warn!(kind = %self.kind, exists, error = %reason, "Report failed");
        self.metrics.inc_report(self.kind, exists, false);
        self.reset(reason).await;
    }

    async fn acknowledge(&self, acks: &Acks) {
        let applied = self.cache.lock().await.acknowledge(&acks.primary);
        let nested = match &self.secondary {
            Some(secondary) => secondary.lock().await.acknowledge(&acks.secondary),
            None => 0,
        };
        debug!(kind = %self.kind, applied, nested, "Applied acknowledgements");
    }

    /// Drop all cached identity so the next cycle sends full snapshots
    pub async fn reset(&self, reason: &str) {
        self.cache.lock().await.reset();
        if let Some(secondary) = &self.secondary {
            secondary.lock().await.reset();
        }
        warn!(event = "cache_reset", kind = %self.kind, reason = %reason, "Identifier cache reset");
        self.metrics.inc_cache_resets(self.kind);
        self.metrics.set_cache_entries(self.kind, caches::PRIMARY, 0);
        if self.secondary.is_some() {
            self.metrics.set_cache_entries(self.kind, caches::NESTED, 0);
        }
    }

    /// Full cycle for kinds without nested records
    pub async fn run_cycle<S: Snapshot>(&self, snapshots: Vec<S>) -> CycleReport {
        let _cycle = self.begin_cycle().await;
        let started = Instant::now();
        let observed = snapshots.len();

        let (records, full) = self.diff(snapshots).await;
        let live_delivered = self.deliver(true, &records).await;
        if live_delivered {
            self.metrics
                .add_objects_reported(self.kind, full, records.len() - full);
        }

        let tombstones: Vec<S> = self.sweep().await;
        let tombstones_delivered = self.deliver(false, &tombstones).await;
        if tombstones_delivered {
            self.metrics.add_tombstones(self.kind, tombstones.len());
        }

        self.finish(
            started,
            CycleStats {
                observed,
                full,
                tombstones: tombstones.len(),
                live_delivered,
                tombstones_delivered,
            },
        )
        .await
    }

    /// Cycle outcome when no watch source is available
    pub fn skipped(&self) -> CycleReport {
        self.metrics.inc_cycles_skipped(self.kind);
        CycleReport::skipped(self.kind)
    }

    /// Record cycle metrics and wrap the stats
    pub async fn finish(&self, started: Instant, stats: CycleStats) -> CycleReport {
        let entries = self.cache.lock().await.len();
        self.metrics.set_cache_entries(self.kind, caches::PRIMARY, entries);
        if let Some(secondary) = &self.secondary {
            let nested = secondary.lock().await.len();
            self.metrics.set_cache_entries(self.kind, caches::NESTED, nested);
        }
        self.metrics
            .observe_cycle_duration(self.kind, started.elapsed().as_secs_f64());
        CycleReport::completed(self.kind, stats)
    }
}
