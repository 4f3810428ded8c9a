//! Runtime statistics endpoint

use crate::breaker::CircuitSnapshot;
use crate::cache::CacheStats;
use crate::handlers::AppState;
use crate::observer::{BackendStats, OutcomeRecord};
use crate::pool::HandleStatus;
use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

const DEFAULT_RECENT: usize = 20;
const MAX_RECENT: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    /// Number of recent outcome records to include
    #[serde(default)]
    pub recent: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_requests: u64,
    pub routing_strategy: &'static str,
    pub cache: CacheStats,
    pub circuits: Vec<CircuitSnapshot>,
    pub pool: Vec<HandleStatus>,
    pub backends: Vec<BackendStats>,
    pub recent: Vec<OutcomeRecord>,
}

/// GET /v1/stats
pub async fn handler(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<StatsResponse> {
    let orchestrator = state.orchestrator();
    let store = state.store();
    let limit = query.recent.unwrap_or(DEFAULT_RECENT).min(MAX_RECENT);

    Json(StatsResponse {
        total_requests: store.total_requests(),
        routing_strategy: orchestrator.router().strategy().as_str(),
        cache: orchestrator.cache().stats(),
        circuits: orchestrator.breaker().snapshot(),
        pool: orchestrator.pool().status(),
        backends: store.backend_stats(),
        recent: store.recent(limit),
    })
}
