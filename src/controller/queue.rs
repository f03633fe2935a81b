// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Deduplicating work queue feeding the reconciliation workers.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ControllerError, Result};

/// Identity of a single unit of reconciliation work. Carries no payload:
/// the reconciler re-reads current state from the cache when processing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub namespace: String,
    pub name: String,
}

impl ReconcileRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Default)]
struct QueueState {
    /// Identities waiting in the channel
    queued: HashSet<ReconcileRequest>,
    /// Identities currently handed to a worker
    in_flight: HashSet<ReconcileRequest>,
    /// In-flight identities that were re-added and must re-queue on done()
    redo: HashSet<ReconcileRequest>,
}

/// Bounded, deduplicating queue of pending reconciliation requests.
///
/// An identity that is already queued coalesces with later adds; an identity
/// being processed is never handed to a second worker, and a re-add while in
/// flight triggers exactly one extra pass once the current one completes.
pub struct WorkQueue {
    tx: mpsc::Sender<ReconcileRequest>,
    rx: tokio::sync::Mutex<mpsc::Receiver<ReconcileRequest>>,
    state: Mutex<QueueState>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Enqueue a request. Blocks when the queue is at capacity rather than
    /// dropping the event. Duplicates of a pending or in-flight identity
    /// coalesce instead of occupying another slot.
    pub async fn add(&self, request: ReconcileRequest) -> Result<()> {
        {
            let mut state = self.state();
            if state.queued.contains(&request) {
                debug!("Request {} already queued, coalescing", request);
                return Ok(());
            }
            if state.in_flight.contains(&request) {
                debug!("Request {} is in flight, marking for requeue", request);
                state.redo.insert(request);
                return Ok(());
            }
            state.queued.insert(request.clone());
        }

        if self.tx.send(request.clone()).await.is_err() {
            self.state().queued.remove(&request);
            return Err(ControllerError::QueueClosed);
        }
        Ok(())
    }

    /// Wait for the next request. Returns `None` once the queue is closed.
    /// The returned identity is marked in flight and will not be yielded
    /// again until [`WorkQueue::done`] is called for it.
    pub async fn take(&self) -> Option<ReconcileRequest> {
        let request = self.rx.lock().await.recv().await?;
        let mut state = self.state();
        state.queued.remove(&request);
        state.in_flight.insert(request.clone());
        Some(request)
    }

    /// Mark processing of a request complete. If the same identity was added
    /// while it was in flight, it is queued again for one more pass.
    pub async fn done(&self, request: ReconcileRequest) -> Result<()> {
        let readd = {
            let mut state = self.state();
            state.in_flight.remove(&request);
            state.redo.take(&request).is_some()
        };
        if readd {
            self.add(request).await?;
        }
        Ok(())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
