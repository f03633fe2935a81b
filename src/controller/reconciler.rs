// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Converges a Pod's Velero tracking annotation with its attached volumes.

use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Patch, PatchParams},
    Api, Client,
};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument};

use crate::cache::PodLister;
use crate::config::Config;
use crate::constants::VELERO_ANNOTATION;
use crate::controller::queue::ReconcileRequest;
use crate::error::Result;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Converged, nothing to do, or the object is gone
    NoOp,
    /// The request should be queued for another pass
    Retry,
}

pub struct Reconciler {
    client: Client,
    lister: PodLister,
    config: Config,
}

impl Reconciler {
    pub fn new(client: Client, lister: PodLister, config: Config) -> Self {
        Self {
            client,
            lister,
            config,
        }
    }

    /// Compute the annotation diff for one Pod and apply the minimal patch.
    ///
    /// The algorithm only ever adds volume names to the annotation, so a
    /// partially applied retry cannot regress previously recorded volumes,
    /// and re-running on a converged Pod is a no-op.
    #[instrument(skip(self), fields(pod = %request))]
    pub async fn reconcile(&self, request: &ReconcileRequest) -> Outcome {
        if !self.config.watches_namespace(&request.namespace) {
            debug!(
                "Skipping reconciliation: namespace {} is not in the configured filter",
                request.namespace
            );
            return Outcome::NoOp;
        }

        debug!("Reconciliation loop for {}", request);

        let Some(pod) = self.lister.get(&request.namespace, &request.name) else {
            // Deleted between enqueue and processing
            debug!("Pod {} no longer in cache", request);
            return Outcome::NoOp;
        };

        if !is_running(&pod) {
            // Volumes may not all be attached yet; defer without error.
            debug!("Pod {} is not Running yet, requeueing", request);
            return Outcome::Retry;
        }

        let tracked = tracked_volumes(&pod);
        let target = target_volumes(&pod, self.config.pvcs_only);

        if tracked.is_empty() && target.is_empty() {
            return Outcome::NoOp;
        }

        let missing: Vec<String> = target
            .iter()
            .filter(|volume| !tracked.contains(volume))
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!("Pod {} already converged", request);
            return Outcome::NoOp;
        }

        let value = merged_annotation_value(&tracked, &missing);
        info!(
            "Reconciling pod {}: target={:?}, tracked={:?}, missing={:?}",
            request, target, tracked, missing
        );

        match self.patch_tracking_annotation(&pod, request, &value).await {
            Ok(()) => Outcome::NoOp,
            Err(e) => {
                error!("Failed to patch pod {}: {}", request, e);
                Outcome::Retry
            }
        }
    }

    async fn patch_tracking_annotation(
        &self,
        pod: &Pod,
        request: &ReconcileRequest,
        value: &str,
    ) -> Result<()> {
        let document = build_annotation_patch(pod.metadata.annotations.as_ref(), value);
        let patch: json_patch::Patch = serde_json::from_value(document)?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        pods.patch(&request.name, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await?;
        Ok(())
    }
}

fn is_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

/// Volume names already recorded in the tracking annotation, sorted
fn tracked_volumes(pod: &Pod) -> Vec<String> {
    let mut volumes: Vec<String> = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(VELERO_ANNOTATION))
        .map(|value| {
            value
                .split(',')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    volumes.sort();
    volumes
}

/// Volume names that should be recorded, sorted. With `pvcs_only` set,
/// volumes without a PersistentVolumeClaim backing are excluded.
fn target_volumes(pod: &Pod, pvcs_only: bool) -> Vec<String> {
    let mut volumes: Vec<String> = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .filter(|volume| !pvcs_only || volume.persistent_volume_claim.is_some())
                .map(|volume| volume.name.clone())
                .collect()
        })
        .unwrap_or_default();
    volumes.sort();
    volumes
}

/// Union of tracked and missing names, de-duplicated, sorted, comma-joined
fn merged_annotation_value(tracked: &[String], missing: &[String]) -> String {
    let mut all: Vec<&str> = tracked
        .iter()
        .chain(missing.iter())
        .map(String::as_str)
        .collect();
    all.sort_unstable();
    all.dedup();
    all.join(",")
}

/// Escape a map key for use as a JSON-Pointer segment
fn escape_pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Build the JSON-Patch document setting the tracking annotation.
///
/// When the Pod has no annotations map the patch must create it in one
/// operation; otherwise only the tracking key is added or replaced.
fn build_annotation_patch(
    annotations: Option<&BTreeMap<String, String>>,
    value: &str,
) -> serde_json::Value {
    match annotations {
        None => json!([{
            "op": "add",
            "path": "/metadata/annotations",
            "value": { VELERO_ANNOTATION: value },
        }]),
        Some(existing) => {
            let op = if existing.contains_key(VELERO_ANNOTATION) {
                "replace"
            } else {
                "add"
            };
            json!([{
                "op": op,
                "path": format!("/metadata/annotations/{}", escape_pointer_segment(VELERO_ANNOTATION)),
                "value": value,
            }])
        }
    }
}
