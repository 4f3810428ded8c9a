//! Routing strategy engine

use super::{LatencyTracker, RouteDecision, RoutingStrategy};
use crate::breaker::{Admission, CircuitBreaker};
use crate::error::{AppError, AppResult};
use crate::pool::ConnectionPool;
use crate::registry::BackendDescriptor;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

pub struct BackendRouter {
    strategy: RoutingStrategy,
    breaker: Arc<CircuitBreaker>,
    pool: Arc<ConnectionPool>,
    latency: LatencyTracker,
    rotations: DashMap<String, AtomicUsize>,
}

impl BackendRouter {
    pub fn new(
        strategy: RoutingStrategy,
        breaker: Arc<CircuitBreaker>,
        pool: Arc<ConnectionPool>,
        latency_alpha: f64,
    ) -> Self {
        Self {
            strategy,
            breaker,
            pool,
            latency: LatencyTracker::new(latency_alpha),
            rotations: DashMap::new(),
        }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    pub fn record_latency(&self, backend_id: &str, latency_ms: f64) {
        self.latency.record(backend_id, latency_ms);
    }

    /// Select with the configured strategy
    pub fn select(
        &self,
        capability: &str,
        candidates: &[Arc<BackendDescriptor>],
    ) -> AppResult<(Arc<BackendDescriptor>, RouteDecision)> {
        self.select_backend(capability, candidates, self.strategy)
    }

    /// Pick one backend for `capability` among `candidates`
    ///
    /// Candidates the breaker would refuse are dropped first. The chosen
    /// backend is then admitted through `allow_request`; if another caller
    /// took its trial slot in the meantime it is dropped and selection
    /// repeats. Ties are broken by candidate order.
    ///
    /// # Errors
    ///
    /// `CircuitOpen` when the only candidate is refused by its breaker,
    /// otherwise `NoHealthyBackend` when no candidate survives.
    pub fn select_backend(
        &self,
        capability: &str,
        candidates: &[Arc<BackendDescriptor>],
        strategy: RoutingStrategy,
    ) -> AppResult<(Arc<BackendDescriptor>, RouteDecision)> {
        let mut eligible: Vec<&Arc<BackendDescriptor>> = candidates
            .iter()
            .filter(|backend| self.breaker.would_allow(&backend.id))
            .collect();

        if strategy == RoutingStrategy::HealthBased {
            eligible.retain(|backend| self.pool.is_healthy(&backend.id));
        }

        while !eligible.is_empty() {
            let position = self.pick(strategy, capability, &eligible);
            let chosen = eligible[position];

            if let Some(admission) = self.breaker.allow_request(&chosen.id) {
                tracing::debug!(
                    backend_id = %chosen.id,
                    capability = %capability,
                    strategy = strategy.as_str(),
                    eligible = eligible.len(),
                    trial = admission == Admission::Trial,
                    "Backend selected"
                );
                let decision = RouteDecision {
                    backend_id: chosen.id.clone(),
                    strategy_used: strategy,
                    admission,
                    candidates_considered: candidates.len(),
                    decided_at: SystemTime::now(),
                };
                return Ok((Arc::clone(chosen), decision));
            }

            tracing::debug!(
                backend_id = %chosen.id,
                "Backend refused admission after selection, reselecting"
            );
            eligible.remove(position);
        }

        if let [only] = candidates {
            if !self.breaker.would_allow(&only.id) {
                return Err(AppError::CircuitOpen {
                    backend_id: only.id.clone(),
                });
            }
        }

        Err(AppError::NoHealthyBackend {
            operation: capability.to_string(),
            candidates: candidates.len(),
        })
    }

    fn pick(
        &self,
        strategy: RoutingStrategy,
        capability: &str,
        eligible: &[&Arc<BackendDescriptor>],
    ) -> usize {
        match strategy {
            RoutingStrategy::RoundRobin | RoutingStrategy::HealthBased => {
                self.next_rotation(capability) % eligible.len()
            }
            RoutingStrategy::LeastConnections => eligible
                .iter()
                .enumerate()
                .min_by_key(|(_, backend)| self.pool.in_flight(&backend.id))
                .map(|(position, _)| position)
                .unwrap_or(0),
            RoutingStrategy::WeightedResponseTime => eligible
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    self.latency
                        .rank(&a.id)
                        .total_cmp(&self.latency.rank(&b.id))
                })
                .map(|(position, _)| position)
                .unwrap_or(0),
        }
    }

    fn next_rotation(&self, capability: &str) -> usize {
        if let Some(counter) = self.rotations.get(capability) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.rotations
            .entry(capability.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }
}
