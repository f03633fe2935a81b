// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! In-memory cache of watched Pods, kept current by the informer.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Identity of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_pod(pod: &Pod) -> Self {
        Self {
            namespace: pod.namespace().unwrap_or_default(),
            name: pod.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Thread-safe store holding the latest observed version of every watched Pod.
/// Entries are replaced wholesale on update; per-identity writes are atomic.
#[derive(Default)]
pub struct PodStore {
    entries: RwLock<HashMap<ObjectKey, Arc<Pod>>>,
}

impl PodStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the Pod's identity
    pub fn put(&self, pod: Pod) {
        let key = ObjectKey::from_pod(&pod);
        self.write().insert(key, Arc::new(pod));
    }

    /// Remove the entry for an identity, if present
    pub fn delete(&self, key: &ObjectKey) {
        self.write().remove(key);
    }

    /// Get the current object for an identity
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        let key = ObjectKey::new(namespace, name);
        self.read().get(&key).cloned()
    }

    /// Swap the entire store contents atomically. Used after a re-list so
    /// entries deleted while the watch was disconnected do not linger.
    pub fn replace(&self, pods: Vec<Pod>) {
        let entries: HashMap<ObjectKey, Arc<Pod>> = pods
            .into_iter()
            .map(|pod| (ObjectKey::from_pod(&pod), Arc::new(pod)))
            .collect();
        *self.write() = entries;
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ObjectKey, Arc<Pod>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ObjectKey, Arc<Pod>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read-only query facade over the [`PodStore`]
#[derive(Clone)]
pub struct PodLister {
    store: Arc<PodStore>,
}

impl PodLister {
    pub fn new(store: Arc<PodStore>) -> Self {
        Self { store }
    }

    /// Return the cached Pod for an identity, or `None` if it is not known
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        self.store.get(namespace, name)
    }
}
