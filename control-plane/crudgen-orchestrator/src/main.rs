use crudgen_orchestrator::{
    config::OrchestratorConfig, init_tracing, runtime,
};
use envconfig::Envconfig;
use kube::Client;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let cfg = OrchestratorConfig::init_from_env()?;
    cfg.validate()?;
    info!(?cfg, "starting crudgen orchestrator");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
