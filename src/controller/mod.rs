// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The watch-reconcile pipeline: informer, work queue, reconciler, driver.

pub mod driver;
pub mod informer;
pub mod queue;
pub mod reconciler;

pub use driver::Driver;
pub use informer::PodInformer;
pub use queue::{ReconcileRequest, WorkQueue};
pub use reconciler::{Outcome, Reconciler};

use kube::Client;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::error;

use crate::cache::{PodLister, PodStore};
use crate::config::Config;
use crate::constants::{QUEUE_CAPACITY, WORKER_COUNT};

/// Assemble and run the full pipeline until the shutdown signal fires.
/// The leader elector owns the signal; the pipeline runs only while this
/// process holds the lease.
pub async fn run_pipeline(client: Client, config: Config, shutdown: watch::Receiver<bool>) {
    let store = Arc::new(PodStore::new());
    let queue = Arc::new(WorkQueue::new(QUEUE_CAPACITY));
    let informer = Arc::new(PodInformer::new(
        client.clone(),
        store.clone(),
        queue.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(client, PodLister::new(store), config));
    let driver = Driver::new(queue, reconciler, WORKER_COUNT);

    let watch_task = {
        let informer = informer.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = informer.run(shutdown).await {
                error!("Pod informer stopped: {}", e);
            }
        })
    };

    if let Err(e) = driver.run(informer, shutdown).await {
        error!("Reconciliation driver stopped: {}", e);
    }
    if let Err(e) = watch_task.await {
        error!("Pod informer task failed: {}", e);
    }
}
