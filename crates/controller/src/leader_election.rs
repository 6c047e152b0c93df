//! Leader election using Kubernetes Leases
//!
//! Only one controller replica reconciles at a time. Lease writes carry the
//! resourceVersion that was read, so two replicas racing for an expired lease
//! cannot both win: the loser gets 409 Conflict and keeps waiting.
//!
//! Losing the lease after acquiring it cancels the process shutdown token, which
//! drains the controller and lets the pod restart as a follower.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tasks::config::LeaderElectionConfig;

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// What to do with the lease as observed
#[derive(Debug, Clone, PartialEq, Eq)]
enum LeaseAction {
    Create,
    Renew,
    TakeOver { transitions: i32 },
    Wait,
}

/// A lease without a renew time or duration counts as expired
#[must_use]
pub fn lease_is_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    match (renew_time, duration) {
        (Some(renewed), Some(secs)) => now > renewed.0 + chrono::Duration::seconds(i64::from(secs)),
        _ => true,
    }
}

fn decide(existing: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseAction {
    let Some(lease) = existing else {
        return LeaseAction::Create;
    };
    let spec = lease.spec.as_ref();

    if spec.and_then(|s| s.holder_identity.as_deref()) == Some(identity) {
        LeaseAction::Renew
    } else if lease_is_expired(spec, now) {
        LeaseAction::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
        }
    } else {
        LeaseAction::Wait
    }
}

pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
}

impl LeaderElector {
    #[must_use]
    pub fn new(client: Client, config: &LeaderElectionConfig, identity: &str) -> Self {
        Self {
            client,
            lease_name: config.lease_name.clone(),
            namespace: config.namespace.clone(),
            identity: identity.to_string(),
            lease_duration: Duration::from_secs(config.lease_duration_seconds),
            renew_interval: Duration::from_secs(config.renew_interval_seconds),
            retry_interval: Duration::from_millis(config.retry_period_millis),
        }
    }

    /// Wait until this replica holds the lease.
    ///
    /// Returns `None` when `shutdown` fires first. The returned guard keeps renewing
    /// and cancels `shutdown` if the lease is lost.
    pub async fn acquire(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> Option<LeaderGuard> {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            namespace = %self.namespace,
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    return Some(self.create_guard(shutdown));
                }
                Ok(false) => {
                    debug!(identity = %self.identity, "Lease held by another replica");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying...");
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => return None,
                () = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    fn create_guard(self: &Arc<Self>, shutdown: CancellationToken) -> LeaderGuard {
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(shutdown).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let existing = match api.get(&self.lease_name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        match decide(existing.as_ref(), &self.identity, now) {
            LeaseAction::Wait => Ok(false),
            LeaseAction::Create => {
                let lease = self.lease(None, now, now, 0);
                self.write(api.create(&PostParams::default(), &lease).await, "Created new lease")
            }
            LeaseAction::Renew => {
                let mut renewed = existing.unwrap_or_default();
                self.require_resource_version(&renewed)?;
                if let Some(spec) = renewed.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                self.write(
                    api.replace(&self.lease_name, &PostParams::default(), &renewed)
                        .await,
                    "Lease renewed",
                )
            }
            LeaseAction::TakeOver { transitions } => {
                let current = existing.unwrap_or_default();
                let rv = self.require_resource_version(&current)?;
                let lease = self.lease(Some(rv), now, now, transitions + 1);
                self.write(
                    api.replace(&self.lease_name, &PostParams::default(), &lease)
                        .await,
                    "Took over expired lease",
                )
            }
        }
    }

    fn require_resource_version(&self, lease: &Lease) -> Result<String, LeaderElectionError> {
        lease
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))
    }

    fn lease(
        &self,
        resource_version: Option<String>,
        acquired: DateTime<Utc>,
        renewed: DateTime<Utc>,
        transitions: i32,
    ) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: i32::try_from(self.lease_duration.as_secs()).ok(),
                acquire_time: Some(MicroTime(acquired)),
                renew_time: Some(MicroTime(renewed)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    /// 409 means another replica wrote the lease first
    fn write(
        &self,
        result: Result<Lease, kube::Error>,
        success: &str,
    ) -> Result<bool, LeaderElectionError> {
        match result {
            Ok(_) => {
                debug!(identity = %self.identity, "{success}");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease write conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(self.renew_interval) => {}
            }

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "Leadership lost, shutting down");
                    shutdown.cancel();
                    return;
                }
            }
        }
    }

    /// Hand the lease over by expiring it, if this replica still holds it
    async fn release_lease(&self) -> Result<(), LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let mut lease = match api.get(&self.lease_name).await {
            Ok(l) => l,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let Some(spec) = lease.spec.as_mut() else {
            return Ok(());
        };
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            debug!(identity = %self.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        spec.holder_identity = None;
        spec.renew_time = Some(MicroTime(Utc::now() - chrono::Duration::seconds(60)));
        api.replace(&self.lease_name, &PostParams::default(), &lease)
            .await?;

        info!(identity = %self.identity, "Lease released for fast failover");
        Ok(())
    }
}

/// Held while this replica is the leader
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
}

impl LeaderGuard {
    /// Stop renewing and expire the lease so a standby can take over immediately
    pub async fn release(self) -> Result<(), LeaderElectionError> {
        self.renewal_task.abort();
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}
