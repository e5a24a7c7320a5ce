//! Watch sources for cluster objects
//!
//! This module provides:
//! - The [`ListerWatcher`] abstraction and its `kube::Api` implementation
//! - A combinator that merges several namespaces into one source
//! - A reflector that mirrors a source into an [`ObjectStore`]
//! - [`KubeChannel`] and [`LazySource`] for on-demand source creation

mod channel;
mod list_watch;
mod multi;
mod reflector;
mod store;

pub use channel::{
    cluster_api, namespaced_api, ApiFactory, KubeChannel, LazySource, SourceParams, WatchSource,
    DEFAULT_CLUSTER_ID,
};
pub use list_watch::{ApiListWatcher, ListerWatcher, ObjectList, Stopper, Watch, WatchEvent};
pub use multi::{
    is_all_namespaces, multi_namespace_lister_watcher, MultiListerWatcher, ALL_NAMESPACES,
    RESOURCE_VERSION_DELIMITER,
};
pub use reflector::Reflector;
pub use store::{object_key, ObjectStore};

use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Bounds shared by every object type the agent watches
pub trait WatchedObject:
    kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> WatchedObject for K where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}
