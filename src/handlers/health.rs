//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::breaker::CircuitStatus;
use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Version of the active registry index
    pub registry_version: u64,
    pub backends: usize,
    /// Backends whose circuit is currently open
    pub open_circuits: usize,
    /// Metrics recording status: "operational" or "degraded"
    pub metrics_status: &'static str,
}

/// Health check handler
///
/// Always returns 200 OK while the process is serving. Metrics status is
/// "degraded" once any metric update or outcome record has been lost.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let orchestrator = state.orchestrator();
    let metrics = state.metrics();

    let lost = metrics.metrics_recording_failures_count() + metrics.outcome_records_dropped_count();
    let metrics_status = if lost > 0 { "degraded" } else { "operational" };

    let open_circuits = orchestrator
        .breaker()
        .snapshot()
        .iter()
        .filter(|c| c.state == CircuitStatus::Open)
        .count();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            registry_version: orchestrator.registry().version(),
            backends: orchestrator.registry().info().backend_count,
            open_circuits,
            metrics_status,
        }),
    )
}
