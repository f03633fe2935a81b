// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Annotation consumed by Velero to discover which volumes of a Pod to back up.
/// The value is a comma-separated, sorted list of volume names.
pub const VELERO_ANNOTATION: &str = "backup.velero.io/backup-volumes";

/// Environment variables read at startup
pub mod env {
    /// Comma-separated list of namespaces to reconcile; unset or empty means all
    pub const NS_FILTER: &str = "VELERO_ANNOTATIONS_CONTROLLER_NS_FILTER";
    /// Any value other than the literal "false" restricts the target set to
    /// volumes backed by a PersistentVolumeClaim
    pub const PVCS_ONLY: &str = "VELERO_ANNOTATIONS_CONTROLLER_PVCS_ONLY";
}

/// Leader-election lease configuration
pub mod lease {
    /// Name of the coordination.k8s.io/v1 Lease shared by all replicas
    pub const NAME: &str = "velero-annotations-controller";
    /// Namespace holding the Lease
    pub const NAMESPACE: &str = "kube-system";
    /// How long an unrenewed Lease remains valid
    pub const DURATION_SECS: u64 = 10;
    /// Renewal failures past this age cost us leadership
    pub const RENEW_DEADLINE_SECS: u64 = 8;
    /// Interval between acquire/renew attempts
    pub const RETRY_PERIOD_SECS: u64 = 5;
}

/// Work queue capacity; producers block rather than drop events when full
pub const QUEUE_CAPACITY: usize = 1024;

/// Number of reconciliation workers draining the queue
pub const WORKER_COUNT: usize = 2;

/// Interval at which the driver polls the informer's synced flag
pub const SYNC_POLL_INTERVAL_MS: u64 = 100;
