pub mod cleanup;
pub mod diff;
pub mod metrics;
mod reconcile;
pub mod status;
pub mod sync;
mod types;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    Client,
    api::Api,
    runtime::{Controller, controller::Action, watcher::Config},
};
use tracing::{error, info, warn};

use crate::cluster::{ClusterError, KubeCluster};
use crate::crd::ServiceDefinition;
use crate::scheme::SchemeError;
use crate::templates::TemplateError;

pub use cleanup::{CleanupError, CleanupRegistry, CleanupStep, FINALIZER};
pub use metrics::Metrics;
pub use reconcile::Reconciler;
pub use sync::{ChildKind, SyncOutcome};
pub use types::{ObjectKey, Outcome};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("failed to fetch {kind} {name}: {source}")]
    Fetch {
        kind: String,
        name: String,
        source: ClusterError,
    },
    #[error("failed to create {kind} {name}: {source}")]
    Create {
        kind: String,
        name: String,
        source: ClusterError,
    },
    #[error("failed to update {kind} {name}: {source}")]
    Update {
        kind: String,
        name: String,
        source: ClusterError,
    },
    #[error("{kind} {name} is not owned by this definition ({reason})")]
    Ownership {
        kind: String,
        name: String,
        reason: String,
    },
    #[error("{kind} {name} cannot be converged: {reason}")]
    Structure {
        kind: String,
        name: String,
        reason: String,
    },
    #[error("{key} cannot be rendered: {source}")]
    Invalid { key: String, source: TemplateError },
    #[error("failed to write status of {key}: {source}")]
    Status { key: String, source: ClusterError },
    #[error("failed to update finalizers of {key}: {source}")]
    Finalizer { key: String, source: ClusterError },
    #[error("cleanup step {step} failed: {source}")]
    Cleanup { step: String, source: CleanupError },
    #[error("cannot link child to owner: {0}")]
    Scheme(#[from] SchemeError),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ReconcileErr {
    /// True when a write lost an optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileErr::Create { source, .. }
            | ReconcileErr::Update { source, .. }
            | ReconcileErr::Status { source, .. }
            | ReconcileErr::Finalizer { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}

pub struct ControllerContext {
    pub reconciler: Reconciler<KubeCluster>,
    pub requeue_error: Duration,
}

/// Watch definitions and their children until a termination signal.
pub async fn run_controller(
    client: Client,
    ctx: Arc<ControllerContext>,
) -> anyhow::Result<()> {
    let settings = ctx.reconciler.settings();
    let api: Api<ServiceDefinition> = Api::all(client.clone());

    let mut controller = Controller::new(api, Config::default())
        .owns(Api::<Deployment>::all(client.clone()), Config::default())
        .owns(Api::<Service>::all(client.clone()), Config::default())
        .owns(Api::<Ingress>::all(client.clone()), Config::default());
    if settings.autoscaler {
        controller = controller.owns(
            Api::<HorizontalPodAutoscaler>::all(client.clone()),
            Config::default(),
        );
    }
    if settings.database.is_some() {
        controller = controller.owns(
            Api::<StatefulSet>::all(client.clone()),
            Config::default(),
        );
    }

    info!(
        autoscaler = settings.autoscaler,
        database = settings.database.is_some(),
        "controller starting"
    );
    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, _action)) => {
                    info!(name = %obj_ref.name, "reconciled")
                }
                Err(e) => error!(error = %e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

async fn reconcile(
    obj: Arc<ServiceDefinition>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let key = ObjectKey::of(&obj);
    ctx.reconciler.reconcile(&key).await?;
    Ok(Action::await_change())
}

fn error_policy(
    obj: Arc<ServiceDefinition>,
    error: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    warn!(key = %ObjectKey::of(&obj), %error, "reconcile failed; requeueing");
    Action::requeue(ctx.requeue_error)
}
