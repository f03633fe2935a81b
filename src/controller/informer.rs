// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pod informer - turns the cluster list/watch stream into cache updates
//! and work queue enqueues.

use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{ObjectKey, PodStore};
use crate::controller::queue::{ReconcileRequest, WorkQueue};
use crate::error::Result;

/// Maintains the Pod watch stream, keeps the [`PodStore`] synchronized and
/// enqueues a [`ReconcileRequest`] for every added or updated Pod.
pub struct PodInformer {
    client: Client,
    store: Arc<PodStore>,
    queue: Arc<WorkQueue>,
    synced: AtomicBool,
}

impl PodInformer {
    pub fn new(client: Client, store: Arc<PodStore>, queue: Arc<WorkQueue>) -> Self {
        Self {
            client,
            store,
            queue,
            synced: AtomicBool::new(false),
        }
    }

    /// Whether the initial list has completed and the cache can be trusted.
    /// Callers poll this before draining the queue.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Drive the watch stream until the shutdown signal fires. Stream drops
    /// re-list and re-watch automatically with backoff; they are never fatal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let stream = watcher(pods, WatcherConfig::default()).default_backoff();
        pin_mut!(stream);

        // Buffer for the Pods of an in-progress (re-)list
        let mut relisted: Vec<Pod> = Vec::new();

        info!("Starting pod watch");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Stopping pod watch");
                        return Ok(());
                    }
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => self.apply_event(&mut relisted, event).await?,
                    Some(Err(e)) => warn!("Pod watch stream error, resyncing: {}", e),
                    None => {
                        warn!("Pod watch stream ended");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Translate one watch event into cache mutations and queue enqueues
    pub(crate) async fn apply_event(&self, relisted: &mut Vec<Pod>, event: watcher::Event<Pod>) -> Result<()> {
        match event {
            watcher::Event::Init => {
                debug!("Pod re-list started");
                relisted.clear();
            }
            watcher::Event::InitApply(pod) => {
                let request = request_for(&pod);
                relisted.push(pod);
                self.queue.add(request).await?;
            }
            watcher::Event::InitDone => {
                let count = relisted.len();
                self.store.replace(std::mem::take(relisted));
                self.synced.store(true, Ordering::SeqCst);
                info!("Pod cache synced, {} pods listed", count);
            }
            watcher::Event::Apply(pod) => {
                let request = request_for(&pod);
                self.store.put(pod);
                self.queue.add(request).await?;
            }
            watcher::Event::Delete(pod) => {
                // Deleted Pods need no convergence
                let key = ObjectKey::from_pod(&pod);
                debug!("Pod {} deleted, dropping from cache", key);
                self.store.delete(&key);
            }
        }
        Ok(())
    }
}

fn request_for(pod: &Pod) -> ReconcileRequest {
    ReconcileRequest::new(pod.namespace().unwrap_or_default(), pod.name_any())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::QUEUE_CAPACITY;
    use crate::test_utils::MockService;
    use kube::api::ObjectMeta;

    fn make_pod(namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn make_informer() -> (PodInformer, Arc<PodStore>, Arc<WorkQueue>) {
        let store = Arc::new(PodStore::new());
        let queue = Arc::new(WorkQueue::new(QUEUE_CAPACITY));
        let informer = PodInformer::new(
            MockService::new().into_client(),
            store.clone(),
            queue.clone(),
        );
        (informer, store, queue)
    }

    #[tokio::test]
    async fn test_initial_list_populates_cache_and_marks_synced() {
        let (informer, store, queue) = make_informer();
        let mut relisted = Vec::new();

        informer
            .apply_event(&mut relisted, watcher::Event::Init)
            .await
            .unwrap();
        assert!(!informer.has_synced());

        informer
            .apply_event(&mut relisted, watcher::Event::InitApply(make_pod("default", "a")))
            .await
            .unwrap();
        informer
            .apply_event(&mut relisted, watcher::Event::InitApply(make_pod("default", "b")))
            .await
            .unwrap();
        informer
            .apply_event(&mut relisted, watcher::Event::InitDone)
            .await
            .unwrap();

        assert!(informer.has_synced());
        assert_eq!(store.len(), 2);
        assert_eq!(queue.take().await.unwrap(), ReconcileRequest::new("default", "a"));
        assert_eq!(queue.take().await.unwrap(), ReconcileRequest::new("default", "b"));
    }

    #[tokio::test]
    async fn test_apply_puts_then_enqueues() {
        let (informer, store, queue) = make_informer();
        let mut relisted = Vec::new();

        informer
            .apply_event(&mut relisted, watcher::Event::Apply(make_pod("default", "web")))
            .await
            .unwrap();

        assert!(store.get("default", "web").is_some());
        assert_eq!(queue.take().await.unwrap(), ReconcileRequest::new("default", "web"));
    }

    #[tokio::test]
    async fn test_delete_removes_without_enqueue() {
        let (informer, store, queue) = make_informer();
        let mut relisted = Vec::new();

        informer
            .apply_event(&mut relisted, watcher::Event::Apply(make_pod("default", "web")))
            .await
            .unwrap();
        // Drain the enqueue caused by the Apply
        let request = queue.take().await.unwrap();
        queue.done(request).await.unwrap();

        informer
            .apply_event(&mut relisted, watcher::Event::Delete(make_pod("default", "web")))
            .await
            .unwrap();

        assert!(store.get("default", "web").is_none());
        let empty = tokio::time::timeout(std::time::Duration::from_millis(50), queue.take()).await;
        assert!(empty.is_err(), "delete must not enqueue work");
    }

    #[tokio::test]
    async fn test_relist_replaces_stale_cache_entries() {
        let (informer, store, _queue) = make_informer();
        let mut relisted = Vec::new();

        informer
            .apply_event(&mut relisted, watcher::Event::Apply(make_pod("default", "stale")))
            .await
            .unwrap();

        // Re-list after a watch drop only returns "fresh"
        informer
            .apply_event(&mut relisted, watcher::Event::Init)
            .await
            .unwrap();
        informer
            .apply_event(&mut relisted, watcher::Event::InitApply(make_pod("default", "fresh")))
            .await
            .unwrap();
        informer
            .apply_event(&mut relisted, watcher::Event::InitDone)
            .await
            .unwrap();

        assert!(store.get("default", "stale").is_none());
        assert!(store.get("default", "fresh").is_some());
    }
}
