use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cluster::KubeCluster;
use crate::config::OrchestratorConfig;
use crate::controller::{
    ControllerContext, Metrics, Reconciler, run_controller,
};
use crate::leader::LeaderElector;
use crate::scheme::Scheme;
use crate::web::run_http_server;

/// Build the reconciler from validated configuration.
pub fn build_context(
    client: Client,
    cfg: &OrchestratorConfig,
    metrics: Metrics,
) -> anyhow::Result<Arc<ControllerContext>> {
    let settings = cfg.sync_settings()?;
    let scheme = Arc::new(Scheme::with_defaults());
    let reconciler = Reconciler::new(KubeCluster::new(client), scheme, settings)
        .with_metrics(metrics);
    Ok(Arc::new(ControllerContext {
        reconciler,
        requeue_error: cfg.requeue_error(),
    }))
}

pub fn spawn_http(
    cfg: &OrchestratorConfig,
    metrics: Metrics,
) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
    let addr = cfg.metrics_socket_addr()?;
    Ok(tokio::spawn(async move { run_http_server(addr, metrics).await }))
}

/// Start the HTTP endpoint and, once leadership is held (when enabled), the
/// controller. Returns when either stops; losing the lease is an error.
pub async fn run_all(client: Client, cfg: OrchestratorConfig) -> anyhow::Result<()> {
    let metrics = Metrics::new();
    let ctx = build_context(client.clone(), &cfg, metrics.clone())?;
    let http = spawn_http(&cfg, metrics)?;

    let elector = if cfg.leader.enabled {
        let elector = LeaderElector::new(
            client.clone(),
            &cfg.leader.namespace,
            &cfg.leader.lease_name,
            cfg.leader_identity()?,
            Duration::from_secs(cfg.leader.lease_duration_secs),
        );
        elector.acquire().await?;
        Some(elector)
    } else {
        None
    };

    let renew = async {
        match &elector {
            Some(e) => e.hold().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        res = run_controller(client, ctx) => {
            info!("controller stopped");
            res
        }
        res = renew => res.map_err(Into::into),
        res = http => {
            res??;
            anyhow::bail!("http server stopped unexpectedly")
        }
    }
}
