// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Lease-based leader election gating the reconciliation pipeline.

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use k8s_openapi::chrono::{Duration as ChronoDuration, Utc};
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::lease;
use crate::error::Result;

/// Why the renew loop handed control back
enum RenewExit {
    /// The lease expired or was taken by another instance
    Lost,
    /// The process was asked to stop
    Shutdown,
}

/// Holds the distributed lock and owns the pipeline lifecycle: the pipeline
/// runs while this instance holds the lease and is torn down the moment
/// leadership is lost.
///
/// State machine: Standby (poll for the lease every retry period) →
/// Leading (renew on a timer, pipeline running) → Standby on loss.
pub struct LeaderElector {
    api: Api<Lease>,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: &Client) -> Self {
        Self {
            api: Api::namespaced(client.clone(), lease::NAMESPACE),
            identity: election_identity(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Run the election loop until the shutdown signal fires. `pipeline` is
    /// invoked with a fresh stop signal each time leadership is acquired.
    pub async fn run<F, Fut>(&self, mut shutdown: watch::Receiver<bool>, pipeline: F) -> Result<()>
    where
        F: Fn(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let retry_period = Duration::from_secs(lease::RETRY_PERIOD_SECS);

        loop {
            // Standby: poll for the lease
            loop {
                if *shutdown.borrow() {
                    return Ok(());
                }
                match self.try_acquire().await {
                    Ok(true) => break,
                    Ok(false) => debug!(
                        "Lease {}/{} held by another instance, retrying in {}s",
                        lease::NAMESPACE,
                        lease::NAME,
                        lease::RETRY_PERIOD_SECS
                    ),
                    Err(e) => warn!("Lease acquire attempt failed: {}", e),
                }
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = sleep(retry_period) => {}
                }
            }

            info!("Acquired leadership as {}", self.identity);
            let (stop_tx, stop_rx) = watch::channel(false);
            let pipeline_task = tokio::spawn(pipeline(stop_rx));

            let exit = self.renew_loop(&mut shutdown).await;

            // Stop the pipeline before anything else so another instance
            // taking the lease does not overlap with our workers.
            let _ = stop_tx.send(true);
            if let Err(e) = pipeline_task.await {
                error!("Pipeline task failed: {}", e);
            }

            match exit {
                RenewExit::Lost => {
                    warn!("Leadership lost, returning to standby");
                }
                RenewExit::Shutdown => {
                    if let Err(e) = self.release().await {
                        warn!("Failed to release lease on shutdown: {}", e);
                    } else {
                        info!("Released lease {}/{}", lease::NAMESPACE, lease::NAME);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Leading: renew the lease every retry period. Returns when renewal
    /// fails past the renew deadline, another holder is observed, or the
    /// process is asked to stop.
    async fn renew_loop(&self, shutdown: &mut watch::Receiver<bool>) -> RenewExit {
        let retry_period = Duration::from_secs(lease::RETRY_PERIOD_SECS);
        let renew_deadline = Duration::from_secs(lease::RENEW_DEADLINE_SECS);
        let mut last_renew = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return RenewExit::Shutdown;
                    }
                }
                _ = sleep(retry_period) => {
                    match self.try_acquire().await {
                        Ok(true) => last_renew = Instant::now(),
                        Ok(false) => return RenewExit::Lost,
                        Err(e) => {
                            warn!("Lease renewal failed: {}", e);
                            if last_renew.elapsed() >= renew_deadline {
                                return RenewExit::Lost;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Try to take or renew the lease. Returns false when another instance
    /// holds an unexpired lease or wins the update race.
    async fn try_acquire(&self) -> Result<bool> {
        let now = MicroTime(Utc::now());

        match self.api.get(lease::NAME).await {
            Ok(mut existing) => {
                let spec = existing.spec.clone().unwrap_or_default();
                if !can_claim(&spec, &self.identity, &now) {
                    return Ok(false);
                }

                let renewal = spec.holder_identity.as_deref() == Some(self.identity.as_str());
                existing.spec = Some(self.claimed_spec(&spec, renewal, &now));

                // resourceVersion is preserved from the get, so a concurrent
                // claimant loses with a 409 instead of clobbering us.
                match self
                    .api
                    .replace(lease::NAME, &PostParams::default(), &existing)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(err)) if err.code == 409 => {
                        debug!("Lease update conflict, another instance won the race");
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                let fresh = Lease {
                    metadata: ObjectMeta {
                        name: Some(lease::NAME.to_string()),
                        namespace: Some(lease::NAMESPACE.to_string()),
                        ..Default::default()
                    },
                    spec: Some(self.claimed_spec(&LeaseSpec::default(), false, &now)),
                };
                match self.api.create(&PostParams::default(), &fresh).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(err)) if err.code == 409 => {
                        debug!("Lease created concurrently by another instance");
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn claimed_spec(&self, previous: &LeaseSpec, renewal: bool, now: &MicroTime) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(lease::DURATION_SECS as i32),
            acquire_time: if renewal {
                previous.acquire_time.clone()
            } else {
                Some(now.clone())
            },
            renew_time: Some(now.clone()),
            lease_transitions: if renewal {
                previous.lease_transitions
            } else {
                // None on a fresh create, incremented on a takeover
                Some(previous.lease_transitions.map_or(0, |t| t + 1))
            },
            ..Default::default()
        }
    }

    /// Clear our holder identity so a standby replica can take over without
    /// waiting for the lease to expire. Best-effort, used on shutdown only.
    async fn release(&self) -> Result<()> {
        let mut existing = self.api.get(lease::NAME).await?;
        let ours = existing
            .spec
            .as_ref()
            .and_then(|spec| spec.holder_identity.as_deref())
            == Some(self.identity.as_str());
        if !ours {
            return Ok(());
        }

        existing.spec = Some(LeaseSpec {
            lease_transitions: existing.spec.and_then(|spec| spec.lease_transitions),
            ..Default::default()
        });
        self.api
            .replace(lease::NAME, &PostParams::default(), &existing)
            .await?;
        Ok(())
    }
}

/// Whether `identity` may claim a lease with the given spec: it is free,
/// already ours, or expired.
fn can_claim(spec: &LeaseSpec, identity: &str, now: &MicroTime) -> bool {
    match spec.holder_identity.as_deref() {
        None | Some("") => true,
        Some(holder) if holder == identity => true,
        Some(_) => is_expired(spec, now),
    }
}

fn is_expired(spec: &LeaseSpec, now: &MicroTime) -> bool {
    let Some(renew_time) = spec.renew_time.as_ref() else {
        return true;
    };
    let duration = i64::from(
        spec.lease_duration_seconds
            .unwrap_or(lease::DURATION_SECS as i32),
    );
    now.0.signed_duration_since(renew_time.0) > ChronoDuration::seconds(duration)
}

/// Per-process election identity, prefixed with the host name when known
fn election_identity() -> String {
    let id = Uuid::new_v4();
    match std::env::var("HOSTNAME") {
        Ok(host) if !host.is_empty() => format!("{host}_{id}"),
        _ => id.to_string(),
    }
}
