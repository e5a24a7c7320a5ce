//! In-memory object store fed by a reflector

use dashmap::DashMap;
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::Arc;

/// `namespace/name` for namespaced objects, `name` otherwise
pub fn object_key<K: kube::Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, obj.name_any()),
        _ => obj.name_any(),
    }
}

/// Concurrent map of the latest known object state
#[derive(Debug)]
pub struct ObjectStore<K> {
    objects: Arc<DashMap<String, Arc<K>>>,
}

impl<K> Clone for ObjectStore<K> {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
        }
    }
}

impl<K> Default for ObjectStore<K> {
    fn default() -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
        }
    }
}

impl<K: kube::Resource> ObjectStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding `items`
    pub fn from_objects(items: impl IntoIterator<Item = K>) -> Self {
        let store = Self::new();
        store.replace(items);
        store
    }

    pub fn apply(&self, obj: K) {
        self.objects.insert(object_key(&obj), Arc::new(obj));
    }

    pub fn remove(&self, obj: &K) {
        self.objects.remove(&object_key(obj));
    }

    /// Swap in a full listing. Objects present in both listings stay
    /// visible throughout.
    pub fn replace(&self, items: impl IntoIterator<Item = K>) {
        let mut keep = HashSet::new();
        for obj in items {
            let key = object_key(&obj);
            keep.insert(key.clone());
            self.objects.insert(key, Arc::new(obj));
        }
        self.objects.retain(|key, _| keep.contains(key));
    }

    pub fn get(&self, key: &str) -> Option<Arc<K>> {
        self.objects.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Every object, ordered by key
    pub fn list(&self) -> Vec<Arc<K>> {
        let mut entries: Vec<(String, Arc<K>)> = self
            .objects
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, obj)| obj).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
