//! Health and stats HTTP endpoints for operational visibility.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::audit::AuditReport;
use crate::gate::{AuditGate, GateStats};
use crate::raid::{RaidDetector, RaidStats};

/// Shared handles the endpoints read from.
#[derive(Clone)]
pub struct HealthState {
    pub detector: Arc<RaidDetector>,
    pub gate: Arc<AuditGate<AuditReport>>,
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub build_timestamp: Option<&'static str>,
    pub git_commit: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub gate: GateStats,
    pub raid: RaidStats,
}

pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Start the health HTTP server.
pub async fn start_health_server(port: u16, state: HealthState) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(port = port, "Starting health server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, port = port, "Failed to bind health server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, build_router(state)).await {
        tracing::error!(error = %e, "Health server error");
    }
}

/// Spawn the health server as a background task.
pub fn spawn_health_server(port: u16, state: HealthState) {
    tokio::spawn(async move {
        start_health_server(port, state).await;
    });
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn version_handler() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: option_env!("BUILD_TIMESTAMP"),
        git_commit: option_env!("GIT_COMMIT"),
    })
}

async fn stats_handler(State(state): State<HealthState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        gate: state.gate.stats(),
        raid: state.detector.stats().await,
    })
}
