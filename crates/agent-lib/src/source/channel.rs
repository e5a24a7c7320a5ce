//! Kubernetes client handle and lazily started watch sources

use super::list_watch::{ApiListWatcher, ListerWatcher};
use super::multi::multi_namespace_lister_watcher;
use super::reflector::Reflector;
use super::store::ObjectStore;
use super::WatchedObject;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, WatchParams};
use kube::{Api, Client, Config};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

/// Builds an `Api` for one namespace (`""` means all namespaces)
pub type ApiFactory<K> = fn(Client, &str) -> Api<K>;

/// `Api` for a namespaced resource kind
pub fn namespaced_api<K>(client: Client, namespace: &str) -> Api<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, namespace)
    }
}

/// `Api` for a cluster-scoped resource kind
pub fn cluster_api<K>(client: Client, _namespace: &str) -> Api<K>
where
    K: kube::Resource<DynamicType = ()>,
{
    Api::all(client)
}

/// Label and field selectors applied to list and watch calls
#[derive(Debug, Clone, Default)]
pub struct SourceParams {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl SourceParams {
    pub fn labels(selector: impl Into<String>) -> Self {
        Self {
            label_selector: Some(selector.into()),
            field_selector: None,
        }
    }

    pub fn fields(selector: impl Into<String>) -> Self {
        Self {
            label_selector: None,
            field_selector: Some(selector.into()),
        }
    }

    fn list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if let Some(labels) = &self.label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            params = params.fields(fields);
        }
        params
    }

    fn watch_params(&self) -> WatchParams {
        let mut params = WatchParams::default();
        if let Some(labels) = &self.label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            params = params.fields(fields);
        }
        params
    }
}

/// A running reflector's store; the reflector stops when this is dropped
pub struct WatchSource<K> {
    store: ObjectStore<K>,
    _guard: Option<DropGuard>,
}

impl<K> WatchSource<K> {
    /// Source over a store that is filled by other means
    pub fn from_store(store: ObjectStore<K>) -> Self {
        Self {
            store,
            _guard: None,
        }
    }

    pub fn store(&self) -> &ObjectStore<K> {
        &self.store
    }
}

/// Cluster id used when none is configured and the API server is unknown
pub const DEFAULT_CLUSTER_ID: &str = "default-cluster";

/// Shared access to the cluster, possibly without a client
#[derive(Clone)]
pub struct KubeChannel {
    client: Option<Client>,
    cluster_url: Option<String>,
    shutdown: CancellationToken,
}

impl KubeChannel {
    pub fn new(client: Client, shutdown: CancellationToken) -> Self {
        Self {
            client: Some(client),
            cluster_url: None,
            shutdown,
        }
    }

    /// Channel without a client; every source stays unavailable
    pub fn disabled() -> Self {
        Self {
            client: None,
            cluster_url: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Connect using in-cluster or kubeconfig settings
    pub async fn connect(shutdown: CancellationToken) -> Self {
        let config = match Config::infer().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Kubernetes client not enabled");
                return Self {
                    shutdown,
                    ..Self::disabled()
                };
            }
        };

        let cluster_url = config.cluster_url.to_string();
        match Client::try_from(config) {
            Ok(client) => {
                info!(cluster_url = %cluster_url, "Kubernetes client initialized");
                Self {
                    client: Some(client),
                    cluster_url: Some(cluster_url),
                    shutdown,
                }
            }
            Err(e) => {
                warn!(error = %e, "Kubernetes client not enabled");
                Self {
                    shutdown,
                    ..Self::disabled()
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Cluster id derived from the API server address
    pub fn default_cluster_id(&self) -> String {
        match self.cluster_url.as_deref().map(|url| url.trim_end_matches('/')) {
            Some(url) if !url.is_empty() => format!("API_SERVER_{url}"),
            _ => DEFAULT_CLUSTER_ID.to_string(),
        }
    }

    /// Start a reflector over `namespaces`; `None` without a client
    pub fn reflect<K: WatchedObject>(
        &self,
        name: &str,
        namespaces: &[String],
        params: &SourceParams,
        api: ApiFactory<K>,
    ) -> Option<WatchSource<K>> {
        let client = self.client.clone()?;
        let list_params = params.list_params();
        let watch_params = params.watch_params();

        let source = multi_namespace_lister_watcher(namespaces, |namespace| {
            Arc::new(ApiListWatcher::new(
                api(client.clone(), namespace),
                list_params.clone(),
                watch_params.clone(),
            )) as Arc<dyn ListerWatcher<K>>
        });

        let store = ObjectStore::new();
        let token = self.shutdown.child_token();
        tokio::spawn(Reflector::new(name, source, store.clone()).run(token.clone()));

        Some(WatchSource {
            store,
            _guard: Some(token.drop_guard()),
        })
    }
}

/// Watch source created on first use
pub struct LazySource<K> {
    name: String,
    channel: KubeChannel,
    namespaces: Vec<String>,
    params: SourceParams,
    api: ApiFactory<K>,
    slot: OnceLock<WatchSource<K>>,
}

impl<K: WatchedObject> LazySource<K> {
    pub fn new(
        name: impl Into<String>,
        channel: KubeChannel,
        namespaces: Vec<String>,
        params: SourceParams,
        api: ApiFactory<K>,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            namespaces,
            params,
            api,
            slot: OnceLock::new(),
        }
    }

    /// Source that is already materialized over `store`
    pub fn ready(name: impl Into<String>, store: ObjectStore<K>, api: ApiFactory<K>) -> Self {
        let source = Self::new(name, KubeChannel::disabled(), Vec::new(), SourceParams::default(), api);
        let _ = source.slot.set(WatchSource::from_store(store));
        source
    }

    /// The store, starting the reflector if needed
    pub fn get(&self) -> Option<&ObjectStore<K>> {
        if let Some(source) = self.slot.get() {
            return Some(source.store());
        }
        let source = self
            .channel
            .reflect(&self.name, &self.namespaces, &self.params, self.api)?;
        Some(self.slot.get_or_init(|| source).store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_channel_defaults() {
        let channel = KubeChannel::disabled();
        assert!(!channel.is_enabled());
        assert_eq!(channel.default_cluster_id(), DEFAULT_CLUSTER_ID);

        let channel = KubeChannel {
            cluster_url: Some("https://10.0.0.1:6443/".to_string()),
            ..KubeChannel::disabled()
        };
        assert_eq!(channel.default_cluster_id(), "API_SERVER_https://10.0.0.1:6443");
    }

    #[test]
    fn test_disabled_channel_reflects_nothing() {
        let channel = KubeChannel::disabled();
        let source = channel.reflect(
            "pods",
            &[String::new()],
            &SourceParams::default(),
            namespaced_api::<k8s_openapi::api::core::v1::Pod>,
        );
        assert!(source.is_none());
    }
}
