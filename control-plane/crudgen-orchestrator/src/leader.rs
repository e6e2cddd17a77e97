//! Single-active-replica election on a `coordination.k8s.io/v1` Lease.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::{
    Client,
    api::{Api, PostParams},
};
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum LeaderError {
    #[error("lease api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("lost lease {lease}; now held by {holder}")]
    Lost { lease: String, holder: String },
}

/// Whether `identity` may take the lease described by `spec` at `now`.
pub fn lease_is_free(
    spec: Option<&LeaseSpec>,
    identity: &str,
    now: DateTime<Utc>,
) -> bool {
    let Some(spec) = spec else {
        return true;
    };
    match spec.holder_identity.as_deref() {
        None | Some("") => return true,
        Some(holder) if holder == identity => return true,
        Some(_) => {}
    }
    let Some(MicroTime(renewed)) = spec.renew_time.as_ref() else {
        return true;
    };
    let ttl = chrono::Duration::seconds(
        spec.lease_duration_seconds.unwrap_or_default().into(),
    );
    *renewed + ttl < now
}

pub struct LeaderElector {
    api: Api<Lease>,
    lease: String,
    identity: String,
    ttl: Duration,
}

impl LeaderElector {
    pub fn new(
        client: Client,
        namespace: &str,
        lease: &str,
        identity: String,
        ttl: Duration,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease: lease.to_string(),
            identity,
            ttl,
        }
    }

    fn retry_period(&self) -> Duration {
        self.ttl / 3
    }

    /// Block until this process holds the lease.
    pub async fn acquire(&self) -> Result<(), LeaderError> {
        loop {
            match self.try_acquire_or_renew().await? {
                None => {
                    info!(lease = %self.lease, identity = %self.identity, "acquired leadership");
                    return Ok(());
                }
                Some(holder) => {
                    debug!(lease = %self.lease, %holder, "lease held elsewhere; waiting");
                }
            }
            tokio::time::sleep(self.retry_period()).await;
        }
    }

    /// Keep renewing; returns only when the lease was lost.
    pub async fn hold(&self) -> Result<(), LeaderError> {
        let mut ticker = tokio::time::interval(self.retry_period());
        loop {
            ticker.tick().await;
            match self.try_acquire_or_renew().await {
                Ok(None) => debug!(lease = %self.lease, "renewed lease"),
                Ok(Some(holder)) => {
                    return Err(LeaderError::Lost {
                        lease: self.lease.clone(),
                        holder,
                    });
                }
                Err(e) => warn!(error = %e, "lease renewal failed"),
            }
        }
    }

    /// `Ok(None)` when held by us afterwards, otherwise the current holder.
    async fn try_acquire_or_renew(&self) -> Result<Option<String>, LeaderError> {
        let now = Utc::now();
        let ttl_secs = i32::try_from(self.ttl.as_secs()).unwrap_or(i32::MAX);

        let Some(mut lease) = self.api.get_opt(&self.lease).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.lease.clone()),
                    ..Default::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(self.identity.clone()),
                    lease_duration_seconds: Some(ttl_secs),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_transitions: Some(0),
                    ..Default::default()
                }),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(None),
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    Ok(Some("unknown".into()))
                }
                Err(e) => Err(e.into()),
            };
        };

        let holder = lease
            .spec
            .as_ref()
            .and_then(|s| s.holder_identity.clone())
            .unwrap_or_default();
        if !lease_is_free(lease.spec.as_ref(), &self.identity, now) {
            return Ok(Some(holder));
        }

        let mut spec = lease.spec.take().unwrap_or_default();
        if holder != self.identity {
            spec.acquire_time = Some(MicroTime(now));
            spec.lease_transitions =
                Some(spec.lease_transitions.unwrap_or(0) + 1);
        }
        spec.holder_identity = Some(self.identity.clone());
        spec.lease_duration_seconds = Some(ttl_secs);
        spec.renew_time = Some(MicroTime(now));
        lease.spec = Some(spec);

        // The replace carries the observed resourceVersion; a concurrent
        // writer makes it fail with 409.
        match self
            .api
            .replace(&self.lease, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(None),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(Some(holder)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(holder: &str, renewed: DateTime<Utc>, ttl: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(holder.into()),
            renew_time: Some(MicroTime(renewed)),
            lease_duration_seconds: Some(ttl),
            ..Default::default()
        }
    }

    #[test]
    fn missing_or_unheld_lease_is_free() {
        let now = Utc::now();
        assert!(lease_is_free(None, "me", now));
        assert!(lease_is_free(Some(&LeaseSpec::default()), "me", now));
    }

    #[test]
    fn own_lease_is_always_renewable() {
        let now = Utc::now();
        assert!(lease_is_free(Some(&spec("me", now, 15)), "me", now));
    }

    #[test]
    fn foreign_lease_is_free_only_after_expiry() {
        let now = Utc::now();
        let fresh = spec("other", now - chrono::Duration::seconds(5), 15);
        assert!(!lease_is_free(Some(&fresh), "me", now));

        let stale = spec("other", now - chrono::Duration::seconds(16), 15);
        assert!(lease_is_free(Some(&stale), "me", now));
    }
}
