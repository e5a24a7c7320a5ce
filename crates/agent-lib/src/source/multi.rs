//! Combining per-namespace list/watch sources into one
//!
//! Kubernetes offers either a single-namespace or a cluster-wide watch.
//! Watching a set of namespaces fans out to one source per namespace and
//! merges them: lists are concatenated, resource versions joined with
//! [`RESOURCE_VERSION_DELIMITER`], and watch events forwarded into one
//! channel.

use super::list_watch::{ListerWatcher, ObjectList, Stopper, Watch, WATCH_BUFFER};
use crate::error::SourceError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Separator between per-source resource versions
pub const RESOURCE_VERSION_DELIMITER: char = '/';

/// Namespace value meaning "every namespace"
pub const ALL_NAMESPACES: &str = "";

/// Returns true when `namespaces` selects the whole cluster
pub fn is_all_namespaces(namespaces: &[String]) -> bool {
    namespaces.is_empty() || namespaces.iter().any(|ns| ns == ALL_NAMESPACES)
}

/// Build a lister-watcher for `namespaces`, bypassing the combinator when
/// a single source suffices
pub fn multi_namespace_lister_watcher<K, F>(
    namespaces: &[String],
    mut source_for: F,
) -> Arc<dyn ListerWatcher<K>>
where
    K: Send + 'static,
    F: FnMut(&str) -> Arc<dyn ListerWatcher<K>>,
{
    if is_all_namespaces(namespaces) {
        return source_for(ALL_NAMESPACES);
    }
    if namespaces.len() == 1 {
        return source_for(&namespaces[0]);
    }
    let sources = namespaces.iter().map(|ns| source_for(ns)).collect();
    Arc::new(MultiListerWatcher::new(sources))
}

/// Ordered collection of sources presented as one
pub struct MultiListerWatcher<K> {
    sources: Vec<Arc<dyn ListerWatcher<K>>>,
}

impl<K> MultiListerWatcher<K> {
    pub fn new(sources: Vec<Arc<dyn ListerWatcher<K>>>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn split_resource_version(&self, resource_version: &str) -> Result<Vec<String>, SourceError> {
        if resource_version.is_empty() {
            return Ok(vec![String::new(); self.sources.len()]);
        }
        let parts: Vec<String> = resource_version
            .split(RESOURCE_VERSION_DELIMITER)
            .map(str::to_string)
            .collect();
        if parts.len() != self.sources.len() {
            return Err(SourceError::ResourceVersionMismatch {
                expected: self.sources.len(),
                actual: parts.len(),
            });
        }
        Ok(parts)
    }
}

#[async_trait]
impl<K: Send + 'static> ListerWatcher<K> for MultiListerWatcher<K> {
    async fn list(&self) -> Result<ObjectList<K>, SourceError> {
        let mut items = Vec::new();
        let mut versions = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let list = source.list().await?;
            items.extend(list.items);
            versions.push(list.resource_version);
        }
        Ok(ObjectList {
            items,
            resource_version: versions.join(&RESOURCE_VERSION_DELIMITER.to_string()),
        })
    }

    async fn watch(&self, resource_version: &str) -> Result<Watch<K>, SourceError> {
        let versions = self.split_resource_version(resource_version)?;

        let mut watches = Vec::with_capacity(self.sources.len());
        for (source, version) in self.sources.iter().zip(&versions) {
            match source.watch(version).await {
                Ok(watch) => watches.push(watch),
                Err(e) => {
                    for started in &watches {
                        started.stop();
                    }
                    return Err(e);
                }
            }
        }

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = CancellationToken::new();
        let stoppers: Vec<Stopper> = watches.iter().map(Watch::stopper).collect();

        for mut watch in watches {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = watch.next() => match event {
                            Some(event) => event,
                            None => break,
                        },
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = tx.send(event) => if sent.is_err() { break },
                    }
                }
            });
        }
        // The merged channel closes once every forwarder has exited
        drop(tx);

        let stopped = AtomicBool::new(false);
        Ok(Watch::new(rx, move || {
            if stopped.swap(true, Ordering::SeqCst) {
                return;
            }
            cancel.cancel();
            for stop in &stoppers {
                stop();
            }
        }))
    }
}
