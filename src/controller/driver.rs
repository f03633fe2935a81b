// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Worker loops pulling requests off the work queue into the reconciler.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::constants::SYNC_POLL_INTERVAL_MS;
use crate::controller::informer::PodInformer;
use crate::controller::queue::{ReconcileRequest, WorkQueue};
use crate::controller::reconciler::{Outcome, Reconciler};
use crate::error::Result;

/// Runs a fixed pool of symmetric workers, each looping take → reconcile →
/// done, re-enqueueing a request when the reconciler asks for a retry.
pub struct Driver {
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    workers: usize,
}

impl Driver {
    pub fn new(queue: Arc<WorkQueue>, reconciler: Arc<Reconciler>, workers: usize) -> Self {
        Self {
            queue,
            reconciler,
            workers,
        }
    }

    /// Wait for the informer's initial list, then drain the queue until the
    /// shutdown signal fires.
    pub async fn run(
        &self,
        informer: Arc<PodInformer>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        // Reconciling against a partially populated cache would treat
        // still-unlisted Pods as deleted, so wait for the synced flag first.
        let mut sync_wait = shutdown.clone();
        while !informer.has_synced() {
            tokio::select! {
                _ = sync_wait.changed() => {
                    if *sync_wait.borrow() {
                        return Ok(());
                    }
                }
                _ = sleep(Duration::from_millis(SYNC_POLL_INTERVAL_MS)) => {}
            }
        }

        info!("Cache synced, starting {} reconciliation workers", self.workers);
        let workers = (0..self.workers).map(|id| self.worker(id, shutdown.clone()));
        futures::future::join_all(workers).await;
        Ok(())
    }

    async fn worker(&self, id: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Worker {} stopping", id);
                        return;
                    }
                }
                request = self.queue.take() => {
                    let Some(request) = request else {
                        debug!("Worker {} stopping, queue closed", id);
                        return;
                    };
                    self.process(request).await;
                }
            }
        }
    }

    async fn process(&self, request: ReconcileRequest) {
        let outcome = self.reconciler.reconcile(&request).await;
        if self.queue.done(request.clone()).await.is_err() {
            return;
        }
        if outcome == Outcome::Retry {
            // Immediate re-enqueue; retries are expected to be infrequent
            // and self-limiting.
            let _ = self.queue.add(request).await;
        }
    }
}
