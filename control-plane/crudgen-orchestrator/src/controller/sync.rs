//! Get-or-create-then-update-delta for one child resource.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use super::ReconcileErr;
use super::diff::{DiffPolicy, escape, overlay};
use crate::cluster::{ClusterApi, Managed, kind_of};
use crate::config::SyncSettings;
use crate::crd::ServiceDefinition;
use crate::scheme::{Scheme, controller_uid};
use crate::templates::network::CLUSTER_ISSUER_ANNOTATION;

/// Kind-specific rules for synchronizing a child.
pub trait ChildKind: Managed {
    /// Paths left to the API server or other controllers.
    fn diff_policy(_settings: &SyncSettings) -> DiffPolicy {
        DiffPolicy::default()
    }

    /// Reject observed objects whose shape cannot be converged by overlay.
    fn check_shape(&self) -> Result<(), String> {
        Ok(())
    }
}

/// The workload container's environment is generated whole; variables the
/// desired workload stops carrying are dropped.
const WORKLOAD_ENV: &str = "/spec/template/spec/containers/0/env";

impl ChildKind for Deployment {
    fn diff_policy(settings: &SyncSettings) -> DiffPolicy {
        let policy = DiffPolicy::default().owned(WORKLOAD_ENV);
        if settings.autoscaler {
            policy.ignore("/spec/replicas")
        } else {
            policy
        }
    }

    fn check_shape(&self) -> Result<(), String> {
        let containers = self
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .map(|p| p.containers.len())
            .unwrap_or(0);
        if containers == 0 {
            return Err("pod template has no containers".into());
        }
        Ok(())
    }
}

impl ChildKind for Service {
    fn diff_policy(_settings: &SyncSettings) -> DiffPolicy {
        DiffPolicy::default()
            .ignore("/spec/clusterIP")
            .ignore("/spec/clusterIPs")
    }
}

impl ChildKind for Ingress {
    fn diff_policy(_settings: &SyncSettings) -> DiffPolicy {
        DiffPolicy::default().owned("/spec/tls").owned(&format!(
            "/metadata/annotations/{}",
            escape(CLUSTER_ISSUER_ANNOTATION)
        ))
    }
}

impl ChildKind for HorizontalPodAutoscaler {}

impl ChildKind for StatefulSet {
    // Claim templates are immutable once the set exists.
    fn diff_policy(_settings: &SyncSettings) -> DiffPolicy {
        DiffPolicy::default().ignore("/spec/volumeClaimTemplates")
    }

    fn check_shape(&self) -> Result<(), String> {
        let containers = self
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .map(|p| p.containers.len())
            .unwrap_or(0);
        if containers == 0 {
            return Err("pod template has no containers".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    /// Pointers of the fields that were rewritten.
    Updated(Vec<String>),
    Unchanged,
}

/// Converge one child of `owner` to `desired`.
pub async fn ensure<C, K>(
    cluster: &C,
    scheme: &Scheme,
    settings: &SyncSettings,
    owner: &ServiceDefinition,
    mut desired: K,
) -> Result<SyncOutcome, ReconcileErr>
where
    C: ClusterApi,
    K: ChildKind,
{
    let kind = kind_of::<K>();
    let name = desired.name_any();
    let ns = desired
        .namespace()
        .unwrap_or_else(|| "default".to_string());
    scheme.require::<K>()?;

    let observed = cluster.get::<K>(&ns, &name).await.map_err(|source| {
        ReconcileErr::Fetch {
            kind: kind.clone(),
            name: name.clone(),
            source,
        }
    })?;

    let Some(observed) = observed else {
        let oref = scheme.controller_reference(owner)?;
        desired.meta_mut().owner_references = Some(vec![oref]);
        cluster.create(&ns, &desired).await.map_err(|source| {
            ReconcileErr::Create {
                kind: kind.clone(),
                name: name.clone(),
                source,
            }
        })?;
        info!(%ns, %name, %kind, "created child");
        return Ok(SyncOutcome::Created);
    };

    let owner_uid = owner.meta().uid.as_deref();
    if owner_uid.is_none() || controller_uid(observed.meta()) != owner_uid {
        return Err(ReconcileErr::Ownership {
            kind,
            name,
            reason: format!(
                "controlled by {}",
                controller_uid(observed.meta()).unwrap_or("nobody")
            ),
        });
    }
    observed
        .check_shape()
        .map_err(|reason| ReconcileErr::Structure {
            kind: kind.clone(),
            name: name.clone(),
            reason,
        })?;

    let mut doc = serde_json::to_value(&observed)?;
    let want = serde_json::to_value(&desired)?;
    let changed = overlay(&mut doc, &want, &K::diff_policy(settings));
    if changed.is_empty() {
        debug!(%ns, %name, %kind, "child unchanged");
        return Ok(SyncOutcome::Unchanged);
    }

    let updated: K = serde_json::from_value(doc)?;
    cluster.replace(&ns, &updated).await.map_err(|source| {
        ReconcileErr::Update {
            kind: kind.clone(),
            name: name.clone(),
            source,
        }
    })?;
    info!(%ns, %name, %kind, fields = ?changed, "updated child");
    Ok(SyncOutcome::Updated(changed))
}
