//! List/watch abstraction over the Kubernetes API

use crate::error::SourceError;
use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{ListParams, WatchParams};
use kube::Api;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::WatchedObject;

/// Buffered events per watch stream
pub(crate) const WATCH_BUFFER: usize = 256;

/// Result of a list call
#[derive(Debug, Clone)]
pub struct ObjectList<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

/// Change notification delivered by a watch
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    Bookmark(String),
    Error(String),
}

/// Function that ends a watch stream
pub type Stopper = Arc<dyn Fn() + Send + Sync>;

/// An active watch: an event receiver plus the handle that stops it
pub struct Watch<K> {
    events: mpsc::Receiver<WatchEvent<K>>,
    stopper: Stopper,
}

impl<K> Watch<K> {
    pub fn new(events: mpsc::Receiver<WatchEvent<K>>, stopper: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            events,
            stopper: Arc::new(stopper),
        }
    }

    /// Next event, `None` once the stream is closed
    pub async fn next(&mut self) -> Option<WatchEvent<K>> {
        self.events.recv().await
    }

    pub fn stop(&self) {
        (self.stopper)()
    }

    pub fn stopper(&self) -> Stopper {
        Arc::clone(&self.stopper)
    }
}

impl<K> fmt::Debug for Watch<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch").finish_non_exhaustive()
    }
}

/// Source of a consistent listing plus a change stream from a resource version
#[async_trait]
pub trait ListerWatcher<K>: Send + Sync {
    async fn list(&self) -> Result<ObjectList<K>, SourceError>;

    /// Watch from `resource_version`; empty means from the current state
    async fn watch(&self, resource_version: &str) -> Result<Watch<K>, SourceError>;
}

/// [`ListerWatcher`] backed by a `kube::Api`
pub struct ApiListWatcher<K> {
    api: Api<K>,
    list_params: ListParams,
    watch_params: WatchParams,
}

impl<K> ApiListWatcher<K> {
    pub fn new(api: Api<K>, list_params: ListParams, watch_params: WatchParams) -> Self {
        Self {
            api,
            list_params,
            watch_params,
        }
    }
}

#[async_trait]
impl<K: WatchedObject> ListerWatcher<K> for ApiListWatcher<K> {
    async fn list(&self) -> Result<ObjectList<K>, SourceError> {
        let list = self.api.list(&self.list_params).await?;
        Ok(ObjectList {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn watch(&self, resource_version: &str) -> Result<Watch<K>, SourceError> {
        let api = self.api.clone();
        let params = self.watch_params.clone();
        let version = resource_version.to_string();

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let (started_tx, started_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let cancel = token.clone();

        // The stream borrows the Api, so both live inside the task
        tokio::spawn(async move {
            let stream = match api.watch(&params, &version).await {
                Ok(stream) => {
                    let _ = started_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = started_tx.send(Err(e));
                    return;
                }
            };
            tokio::pin!(stream);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                    item = stream.next() => {
                        let event = match item {
                            None => break,
                            Some(Ok(event)) => convert_event(event),
                            Some(Err(e)) => WatchEvent::Error(e.to_string()),
                        };
                        let terminal = matches!(event, WatchEvent::Error(_));
                        if tx.send(event).await.is_err() || terminal {
                            break;
                        }
                    }
                }
            }
            debug!("Watch stream closed");
        });

        started_rx
            .await
            .map_err(|_| SourceError::Watch("watch task exited before starting".to_string()))??;

        Ok(Watch::new(rx, move || token.cancel()))
    }
}

fn convert_event<K>(event: kube::api::WatchEvent<K>) -> WatchEvent<K> {
    match event {
        kube::api::WatchEvent::Added(obj) => WatchEvent::Added(obj),
        kube::api::WatchEvent::Modified(obj) => WatchEvent::Modified(obj),
        kube::api::WatchEvent::Deleted(obj) => WatchEvent::Deleted(obj),
        kube::api::WatchEvent::Bookmark(bookmark) => {
            WatchEvent::Bookmark(bookmark.metadata.resource_version)
        }
        kube::api::WatchEvent::Error(status) => WatchEvent::Error(status.message),
    }
}
