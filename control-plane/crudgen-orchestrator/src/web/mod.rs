use std::net::SocketAddr;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::controller::Metrics;

const OPENMETRICS: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

pub fn router(metrics: Metrics) -> Router {
    // Expose both /health (preferred) and /healthz (kubelet convention)
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, OPENMETRICS)], body)
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn run_http_server(
    addr: SocketAddr,
    metrics: Metrics,
) -> anyhow::Result<()> {
    info!("health/metrics listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, router(metrics))
        .await?;
    Ok(())
}
