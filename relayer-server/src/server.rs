//! Axum telemetry server: liveness and readiness probes.

use crate::state::AppState;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use relayer_sdk::objects::{HealthResponse, PipelineStatus, ProbeResponse};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Build the telemetry router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/alive", get(alive_check))
        .route("/ready", get(ready_check))
        .with_state(state)
}

/// Simple health check - returns OK if the process is serving HTTP.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// 200 while the worker pool is running.
async fn alive_check(State(state): State<AppState>) -> impl IntoResponse {
    probe(state.relayer.alive(), state.relayer.status())
}

/// 200 while the pipeline is running and still ingesting.
async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    probe(state.relayer.ready(), state.relayer.status())
}

fn probe(ok: bool, pipeline: PipelineStatus) -> (StatusCode, Json<ProbeResponse>) {
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ProbeResponse { ok, pipeline }))
}

/// Run the server until `shutdown` is cancelled.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Telemetry server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
