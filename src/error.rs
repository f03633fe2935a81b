// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid patch document: {0}")]
    PatchError(#[from] serde_json::Error),

    #[error("Work queue is closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, ControllerError>;
