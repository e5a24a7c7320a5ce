//! Keeps an [`ObjectStore`] in sync with a [`ListerWatcher`]

use super::list_watch::{ListerWatcher, WatchEvent};
use super::store::ObjectStore;
use crate::error::SourceError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// List, then watch; relist whenever the watch ends or fails
pub struct Reflector<K> {
    name: String,
    source: Arc<dyn ListerWatcher<K>>,
    store: ObjectStore<K>,
}

impl<K: kube::Resource + Send + Sync + 'static> Reflector<K> {
    pub fn new(name: impl Into<String>, source: Arc<dyn ListerWatcher<K>>, store: ObjectStore<K>) -> Self {
        Self {
            name: name.into(),
            source,
            store,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(source = %self.name, "Starting reflector");
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match self.list_and_watch(&shutdown).await {
                Ok(()) => backoff = INITIAL_BACKOFF,
                Err(e) => {
                    warn!(
                        source = %self.name,
                        error = %e,
                        retry_ms = backoff.as_millis() as u64,
                        "List/watch failed"
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
        }

        info!(source = %self.name, "Reflector stopped");
    }

    async fn list_and_watch(&self, shutdown: &CancellationToken) -> Result<(), SourceError> {
        let list = self.source.list().await?;
        debug!(
            source = %self.name,
            objects = list.items.len(),
            resource_version = %list.resource_version,
            "Listed objects"
        );
        self.store.replace(list.items);

        let mut watch = self.source.watch(&list.resource_version).await?;
        let result = loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                event = watch.next() => event,
            };
            match event {
                None => break Ok(()),
                Some(WatchEvent::Added(obj)) | Some(WatchEvent::Modified(obj)) => {
                    self.store.apply(obj)
                }
                Some(WatchEvent::Deleted(obj)) => self.store.remove(&obj),
                Some(WatchEvent::Bookmark(_)) => {}
                Some(WatchEvent::Error(message)) => break Err(SourceError::Watch(message)),
            }
        };
        watch.stop();
        result
    }
}
