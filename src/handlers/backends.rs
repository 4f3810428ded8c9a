//! Registry endpoints

use crate::breaker::CircuitStatus;
use crate::error::AppError;
use crate::handlers::AppState;
use crate::registry::RegistryInfo;
use axum::{Json, extract::State};
use serde::Serialize;

/// Response for GET /v1/backends
#[derive(Debug, Serialize)]
pub struct BackendsResponse {
    pub registry: RegistryInfo,
    pub backends: Vec<BackendStatus>,
}

/// One registered backend with its live routing state
#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub name: String,
    pub category: String,
    pub base_address: String,
    pub operations: Vec<String>,
    pub circuit: CircuitStatus,
    pub connection_healthy: bool,
    pub in_flight: usize,
    pub average_latency_ms: Option<f64>,
}

/// GET /v1/backends
pub async fn list(State(state): State<AppState>) -> Json<BackendsResponse> {
    let orchestrator = state.orchestrator();
    let backends: Vec<BackendStatus> = orchestrator
        .registry()
        .all()
        .iter()
        .map(|backend| BackendStatus {
            id: backend.id.clone(),
            name: backend.display_name.clone(),
            category: backend.category.clone(),
            base_address: backend.base_address.clone(),
            operations: backend.operations.iter().map(|op| op.name.clone()).collect(),
            circuit: orchestrator.breaker().state(&backend.id),
            connection_healthy: orchestrator.pool().is_healthy(&backend.id),
            in_flight: orchestrator.pool().in_flight(&backend.id),
            average_latency_ms: orchestrator.router().latency().average(&backend.id),
        })
        .collect();

    tracing::debug!(backend_count = backends.len(), "Listed backends");

    Json(BackendsResponse {
        registry: orchestrator.registry().info(),
        backends,
    })
}

/// POST /v1/registry/refresh
///
/// A failed refresh keeps the previous registry and reports the error.
pub async fn refresh(State(state): State<AppState>) -> Result<Json<RegistryInfo>, AppError> {
    let registry = state.orchestrator().registry();
    registry.refresh().await?;
    Ok(Json(registry.info()))
}
