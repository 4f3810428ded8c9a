//! Active health probing of open circuits
//!
//! Recovers backends without waiting for user traffic to run the trial call.

use super::{Admission, CircuitBreaker};
use crate::pool::{CallOutcome, ConnectionPool};
use crate::registry::{BackendDescriptor, Registry};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

pub struct HealthProber {
    registry: Arc<Registry>,
    pool: Arc<ConnectionPool>,
    breaker: Arc<CircuitBreaker>,
}

impl HealthProber {
    pub fn new(
        registry: Arc<Registry>,
        pool: Arc<ConnectionPool>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            registry,
            pool,
            breaker,
        }
    }

    /// Probe every open circuit whose reset timeout has elapsed
    ///
    /// The probe claims the trial slot through `allow_request`, so it never
    /// runs alongside a user trial. Returns the number of backends probed.
    pub async fn probe_once(&self) -> usize {
        let due: Vec<Arc<BackendDescriptor>> = self
            .registry
            .all()
            .into_iter()
            .filter(|backend| self.breaker.probe_due(&backend.id))
            .filter(|backend| {
                self.breaker.allow_request(&backend.id) == Some(Admission::Trial)
            })
            .collect();

        let probed = due.len();
        join_all(due.iter().map(|backend| self.probe(backend))).await;
        probed
    }

    async fn probe(&self, backend: &Arc<BackendDescriptor>) {
        let lease = match self.pool.acquire(backend) {
            Ok(lease) => lease,
            Err(e) => {
                tracing::debug!(
                    backend_id = %backend.id,
                    error = %e,
                    "Health probe could not acquire a connection"
                );
                self.breaker.abandon_trial(&backend.id, Admission::Trial);
                return;
            }
        };

        let result = lease.transport().capabilities().await;
        match &result {
            Ok(operations) => {
                tracing::info!(
                    backend_id = %backend.id,
                    operation_count = operations.len(),
                    "Health probe succeeded"
                );
                self.breaker.record_success(&backend.id, Admission::Trial);
            }
            Err(e) if e.counts_as_backend_failure() => {
                tracing::warn!(backend_id = %backend.id, error = %e, "Health probe failed");
                self.breaker.record_failure(&backend.id, Admission::Trial);
            }
            Err(e) => {
                tracing::info!(
                    backend_id = %backend.id,
                    error = %e,
                    "Health probe got a response, treating backend as reachable"
                );
                self.breaker.record_success(&backend.id, Admission::Trial);
            }
        }
        self.pool.release(lease, CallOutcome::from_result(&result));
    }

    /// Start the background probe loop with a monitor task
    pub fn start(self: Arc<Self>, interval: Duration) {
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                "Starting background health probes"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let probed = self.probe_once().await;
                if probed > 0 {
                    tracing::debug!(probed, "Health probe round finished");
                }
            }
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(_) => tracing::error!(
                    "Background health probe task terminated unexpectedly. \
                    Open circuits will only recover through user traffic."
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    "Background health probe task panicked. \
                    Open circuits will only recover through user traffic."
                ),
            }
        });
    }
}
