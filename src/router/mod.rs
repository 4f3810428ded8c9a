//! Backend selection
//!
//! Picks one backend among the candidates exposing an operation. Every
//! strategy filters through the circuit breaker first, so an open backend is
//! never selected.

pub mod engine;
pub mod latency;

pub use engine::BackendRouter;
pub use latency::LatencyTracker;

use crate::breaker::Admission;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Selection strategy among eligible backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Rotate through eligible backends, one counter per operation
    #[default]
    RoundRobin,
    /// Fewest in-flight calls in the connection pool
    LeastConnections,
    /// Lowest moving-average latency
    WeightedResponseTime,
    /// Drop backends with unusable pooled connections, then rotate
    HealthBased,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::WeightedResponseTime => "weighted_response_time",
            Self::HealthBased => "health_based",
        }
    }
}

/// Record of one routing decision, kept for observability
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub backend_id: String,
    pub strategy_used: RoutingStrategy,
    /// Breaker admission the chosen backend was granted; a trial holder must
    /// hand it back with the call's verdict
    pub admission: Admission,
    pub candidates_considered: usize,
    pub decided_at: SystemTime,
}
