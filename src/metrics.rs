//! Prometheus metrics for toolroute
//!
//! Tracks:
//! - Processed requests by outcome and cache result
//! - Backend call latency
//! - Circuit breaker transitions per backend
//! - Cache lookups, dropped outcome records and error kinds
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use crate::error::ErrorKind;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Request outcome label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Cache lookup result label
///
/// `Bypass` covers requests that never consulted the cache (non-idempotent
/// operations, disabled cache, failures before the lookup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    Hit,
    Miss,
    Bypass,
}

impl CacheResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheResult::Hit => "hit",
            CacheResult::Miss => "miss",
            CacheResult::Bypass => "bypass",
        }
    }
}

/// Circuit breaker transition label (target state)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    Opened,
    HalfOpened,
    Closed,
}

impl CircuitTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitTransition::Opened => "open",
            CircuitTransition::HalfOpened => "half_open",
            CircuitTransition::Closed => "closed",
        }
    }
}

/// Prometheus metrics collector
///
/// Cheap to share behind an `Arc`; every recorder takes `&self`.
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    backend_call_duration: HistogramVec,
    circuit_transitions: IntCounterVec,
    cache_lookups: IntCounterVec,
    errors_total: IntCounterVec,
    outcome_records_dropped: IntCounter,
    metrics_recording_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance registered on a fresh Prometheus registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 2 outcomes x 3 cache results
        let requests_total = IntCounterVec::new(
            Opts::new(
                "toolroute_requests_total",
                "Total number of processed requests by outcome and cache result",
            ),
            &["outcome", "cache"],
        )?;

        let backend_call_duration = HistogramVec::new(
            HistogramOpts::new(
                "toolroute_backend_call_duration_ms",
                "Backend call latency in milliseconds, including retries",
            )
            .buckets(vec![
                1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0,
            ]),
            &["outcome"],
        )?;

        // Cardinality: N backends x 3 target states (bounded by registry size)
        let circuit_transitions = IntCounterVec::new(
            Opts::new(
                "toolroute_circuit_transitions_total",
                "Circuit breaker state transitions by backend and target state",
            ),
            &["backend", "to_state"],
        )?;

        let cache_lookups = IntCounterVec::new(
            Opts::new(
                "toolroute_cache_lookups_total",
                "Result cache lookups by result",
            ),
            &["result"],
        )?;

        let errors_total = IntCounterVec::new(
            Opts::new(
                "toolroute_errors_total",
                "Failed requests by error kind",
            ),
            &["kind"],
        )?;

        let outcome_records_dropped = IntCounter::with_opts(Opts::new(
            "toolroute_outcome_records_dropped_total",
            "Outcome records dropped because the observer channel was full or closed",
        ))?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "toolroute_metrics_recording_failures_total",
                "Metrics recording operation failures by operation. \
                Indicates Prometheus internal errors.",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(backend_call_duration.clone()))?;
        registry.register(Box::new(circuit_transitions.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(outcome_records_dropped.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            backend_call_duration,
            circuit_transitions,
            cache_lookups,
            errors_total,
            outcome_records_dropped,
            metrics_recording_failures,
        })
    }

    /// Record a processed request
    pub fn record_request(
        &self,
        outcome: Outcome,
        cache: CacheResult,
    ) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[outcome.as_str(), cache.as_str()])?
            .inc();
        Ok(())
    }

    /// Record backend call latency
    ///
    /// # Errors
    ///
    /// Rejects NaN, infinite and negative durations; they would corrupt every
    /// percentile computed from the histogram.
    pub fn record_backend_latency(
        &self,
        outcome: Outcome,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite (not NaN or Infinity), got: {}",
                duration_ms
            )));
        }
        if duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be non-negative, got: {}",
                duration_ms
            )));
        }

        self.backend_call_duration
            .get_metric_with_label_values(&[outcome.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    /// Record a circuit breaker transition
    pub fn record_circuit_transition(
        &self,
        backend_id: &str,
        transition: CircuitTransition,
    ) -> Result<(), prometheus::Error> {
        self.circuit_transitions
            .get_metric_with_label_values(&[backend_id, transition.as_str()])?
            .inc();
        Ok(())
    }

    /// Record a cache lookup
    pub fn record_cache_lookup(&self, result: CacheResult) -> Result<(), prometheus::Error> {
        self.cache_lookups
            .get_metric_with_label_values(&[result.as_str()])?
            .inc();
        Ok(())
    }

    /// Record a failed request by error kind
    pub fn record_error(&self, kind: ErrorKind) -> Result<(), prometheus::Error> {
        self.errors_total
            .get_metric_with_label_values(&[kind.as_str()])?
            .inc();
        Ok(())
    }

    /// Count an outcome record the observer could not accept
    pub fn outcome_record_dropped(&self) {
        self.outcome_records_dropped.inc();
    }

    pub fn outcome_records_dropped_count(&self) -> u64 {
        self.outcome_records_dropped.get()
    }

    /// Count a failed recording call
    ///
    /// `operation` names the recorder that failed, e.g. "record_request".
    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    /// Total metrics recording failures across all operations
    pub fn metrics_recording_failures_count(&self) -> u64 {
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.name() == "toolroute_metrics_recording_failures_total")
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Encode all metrics in Prometheus text exposition format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                e.utf8_error().valid_up_to(),
                e
            ))
        })
    }
}
