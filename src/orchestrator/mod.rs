//! Request orchestration
//!
//! [`Orchestrator::process`] is the single entry point of the routing core.
//! It runs a request through translation, registry lookup, parameter
//! validation, the result cache, backend selection, the connection pool and
//! the retry executor, then reports the outcome. Every failure is folded
//! into a [`ResultEnvelope`]; `process` itself never fails.

pub mod context;

pub use context::RequestContext;

use crate::breaker::{Admission, CircuitBreaker, HealthProber};
use crate::cache::{Fingerprint, ResultCache};
use crate::config::Config;
use crate::error::{AppError, AppResult, ErrorKind, TransportFailure};
use crate::metrics::{CacheResult, Metrics, Outcome};
use crate::observer::{OutcomeRecord, OutcomeSink};
use crate::pool::{CallOutcome, ConnectionPool, PooledConnection};
use crate::registry::{BackendDescriptor, Registry};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::router::BackendRouter;
use crate::translator::{self, Translation};
use crate::transport::TransportFactory;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Structured call naming an operation directly
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallRequest {
    #[serde(default)]
    pub backend_id: Option<String>,
    pub operation: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Input to [`Orchestrator::process`]
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Free-text instruction, translated before lookup
    Text(String),
    Call(CallRequest),
}

impl Request {
    pub fn text(text: impl Into<String>) -> Self {
        Request::Text(text.into())
    }

    pub fn call(operation: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Request::Call(CallRequest {
            backend_id: None,
            operation: operation.into(),
            parameters,
        })
    }

    pub fn call_on(
        backend_id: impl Into<String>,
        operation: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Self {
        Request::Call(CallRequest {
            backend_id: Some(backend_id.into()),
            operation: operation.into(),
            parameters,
        })
    }
}

/// Error part of a failed [`ResultEnvelope`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,
}

impl From<&AppError> for EnvelopeError {
    fn from(error: &AppError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            backend_id: error.backend_id().map(str::to_string),
        }
    }
}

/// Uniform result of a processed request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    pub backend_id: Option<String>,
    pub operation: Option<String>,
    pub latency_ms: f64,
    pub cache_hit: bool,
    pub request_id: String,
}

/// Capability check result for one backend
#[derive(Debug, Clone, Serialize)]
pub struct WarmUpReport {
    pub backend_id: String,
    pub advertised: usize,
    /// Operations the registry lists but the backend did not advertise
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Candidate {
    backend: Arc<BackendDescriptor>,
    fingerprint: Fingerprint,
}

struct Resolved {
    operation: String,
    parameters: Value,
    candidates: Vec<Candidate>,
}

/// What happened to a request before it is turned into an envelope
struct Handled {
    operation: Option<String>,
    backend_id: Option<String>,
    cache: CacheResult,
    result: AppResult<Value>,
}

impl Handled {
    fn failed(operation: Option<String>, error: AppError) -> Self {
        Self {
            operation,
            backend_id: error.backend_id().map(str::to_string),
            cache: CacheResult::Bypass,
            result: Err(error),
        }
    }
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    pool: Arc<ConnectionPool>,
    breaker: Arc<CircuitBreaker>,
    router: Arc<BackendRouter>,
    cache: Arc<ResultCache>,
    retry: RetryExecutor,
    metrics: Arc<Metrics>,
    sink: Arc<dyn OutcomeSink>,
}

impl Orchestrator {
    /// Build the routing core from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the retry settings are invalid.
    pub fn new(
        config: &Config,
        registry: Arc<Registry>,
        factory: Arc<dyn TransportFactory>,
        metrics: Arc<Metrics>,
        sink: Arc<dyn OutcomeSink>,
    ) -> AppResult<Self> {
        let pool = Arc::new(ConnectionPool::new(
            factory,
            config.pool.idle_timeout(),
            config.pool.max_in_flight_per_backend,
        ));
        let breaker = Arc::new(
            CircuitBreaker::new(
                config.circuit_breaker.failure_threshold,
                config.circuit_breaker.reset_timeout(),
            )
            .with_metrics(Arc::clone(&metrics)),
        );
        let router = Arc::new(BackendRouter::new(
            config.routing.strategy,
            Arc::clone(&breaker),
            Arc::clone(&pool),
            config.routing.latency_ema_alpha,
        ));
        let cache = Arc::new(ResultCache::new(&config.cache));
        let retry = RetryExecutor::new(RetryPolicy::from_config(&config.retry)?, Arc::clone(&breaker));

        tracing::info!(
            strategy = config.routing.strategy.as_str(),
            failure_threshold = config.circuit_breaker.failure_threshold,
            max_attempts = config.retry.max_attempts,
            cache_enabled = config.cache.enabled,
            "Orchestrator initialized"
        );

        Ok(Self {
            registry,
            pool,
            breaker,
            router,
            cache,
            retry,
            metrics,
            sink,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn router(&self) -> &Arc<BackendRouter> {
        &self.router
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Process one request to completion
    pub async fn process(&self, request: Request, ctx: RequestContext) -> ResultEnvelope {
        let started = Instant::now();
        let handled = self.handle(&request, &ctx).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let success = handled.result.is_ok();
        let cache_hit = handled.cache == CacheResult::Hit;
        let (data, error) = match handled.result {
            Ok(data) => (Some(data), None),
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    operation = ?handled.operation,
                    backend_id = ?handled.backend_id,
                    error_kind = e.kind().as_str(),
                    error = %e,
                    "Request failed"
                );
                self.observe("record_error", self.metrics.record_error(e.kind()));
                (None, Some(EnvelopeError::from(&e)))
            }
        };

        self.observe(
            "record_request",
            self.metrics
                .record_request(Outcome::from_success(success), handled.cache),
        );

        self.sink.record(OutcomeRecord {
            request_id: ctx.request_id.clone(),
            backend_id: handled.backend_id.clone(),
            operation: handled.operation.clone(),
            success,
            error_kind: error.as_ref().map(|e| e.kind),
            latency_ms,
            cache_hit,
            recorded_at: SystemTime::now(),
        });

        tracing::info!(
            request_id = %ctx.request_id,
            operation = ?handled.operation,
            backend_id = ?handled.backend_id,
            success,
            cache_hit,
            latency_ms,
            "Request processed"
        );

        ResultEnvelope {
            success,
            data,
            error,
            backend_id: handled.backend_id,
            operation: handled.operation,
            latency_ms,
            cache_hit,
            request_id: ctx.request_id,
        }
    }

    async fn handle(&self, request: &Request, ctx: &RequestContext) -> Handled {
        let resolved = match self.resolve(request) {
            Ok(resolved) => resolved,
            Err(e) => return Handled::failed(None, e),
        };
        let operation = Some(resolved.operation.clone());

        if ctx.is_done() {
            return Handled::failed(operation, AppError::Cancelled);
        }

        for candidate in &resolved.candidates {
            if !candidate.fingerprint.is_cacheable() {
                continue;
            }
            if let Some(value) = self.cache.get(&candidate.fingerprint) {
                self.observe(
                    "record_cache_lookup",
                    self.metrics.record_cache_lookup(CacheResult::Hit),
                );
                tracing::debug!(
                    request_id = %ctx.request_id,
                    backend_id = %candidate.backend.id,
                    fingerprint = %candidate.fingerprint,
                    "Cache hit"
                );
                return Handled {
                    operation,
                    backend_id: Some(candidate.backend.id.clone()),
                    cache: CacheResult::Hit,
                    result: Ok(value),
                };
            }
        }

        let cache = if self.cache.is_enabled()
            && resolved.candidates.iter().any(|c| c.fingerprint.is_cacheable())
        {
            CacheResult::Miss
        } else {
            CacheResult::Bypass
        };
        self.observe(
            "record_cache_lookup",
            self.metrics.record_cache_lookup(cache),
        );

        let (candidate, admission, lease) = match self.select_and_acquire(&resolved, ctx) {
            Ok(selected) => selected,
            Err(e) => {
                return Handled {
                    cache,
                    ..Handled::failed(operation, e)
                };
            }
        };
        let backend_id = candidate.backend.id.clone();

        let call_started = Instant::now();
        let backend_ref = backend_id.as_str();
        let backend = &candidate.backend;
        let pool = self.pool.as_ref();
        // Held between attempts; emptied when an attempt reports the handle unusable
        let leased = Mutex::new(Some(lease));
        let leased_ref = &leased;
        let operation_name = resolved.operation.as_str();
        let parameters = &resolved.parameters;
        let result = self
            .retry
            .execute(
                &backend_id,
                admission,
                &ctx.cancel,
                ctx.deadline,
                |attempt| async move {
                    if attempt > 1 {
                        tracing::debug!(backend_id = %backend_ref, attempt, "Retrying backend call");
                    }
                    let held = leased_ref.lock().take();
                    let lease = match held {
                        Some(lease) => lease,
                        None => reacquire(pool, backend)?,
                    };
                    let result = lease.transport().execute(operation_name, parameters).await;
                    match &result {
                        Err(e) if e.is_fatal_to_handle() => pool.release(lease, CallOutcome::Fatal),
                        _ => *leased_ref.lock() = Some(lease),
                    }
                    result
                },
            )
            .await;
        let call_ms = call_started.elapsed().as_secs_f64() * 1000.0;

        if let Ok(value) = &result {
            if candidate.fingerprint.is_cacheable() {
                self.cache.set(&candidate.fingerprint, value.clone(), None);
            }
            self.router.record_latency(&backend_id, call_ms);
        }
        if let Some(lease) = leased.into_inner() {
            self.pool.release(lease, CallOutcome::from_result(&result));
        }

        if !matches!(result, Err(AppError::Cancelled)) {
            self.observe(
                "record_backend_latency",
                self.metrics
                    .record_backend_latency(Outcome::from_success(result.is_ok()), call_ms),
            );
        }

        Handled {
            operation,
            backend_id: Some(backend_id),
            cache,
            result,
        }
    }

    /// Resolve the operation, its candidate backends and its parameters
    fn resolve(&self, request: &Request) -> AppResult<Resolved> {
        let (operation, parameters, candidates) = match request {
            Request::Call(call) => {
                let candidates = match &call.backend_id {
                    Some(id) => {
                        let backend = self.registry.find_by_id(id).ok_or_else(|| {
                            AppError::NoMatchingOperation(format!("unknown backend '{}'", id))
                        })?;
                        if backend.operation(&call.operation).is_none() {
                            return Err(AppError::NoMatchingOperation(format!(
                                "backend '{}' has no operation '{}'",
                                id, call.operation
                            )));
                        }
                        vec![backend]
                    }
                    None => self.registry.find_by_operation(&call.operation),
                };
                (call.operation.clone(), call.parameters.clone(), candidates)
            }
            Request::Text(text) => {
                let translation = translator::translate(text);
                let (operation, candidates) = self.lookup_translated(text, &translation)?;
                (operation, translation.parameters, candidates)
            }
        };

        if candidates.is_empty() {
            return Err(AppError::NoMatchingOperation(format!(
                "no backend provides operation '{}'",
                operation
            )));
        }

        // Keep candidates whose schema accepts the parameters
        let mut first_rejection = None;
        let mut accepted = Vec::with_capacity(candidates.len());
        let parameters_value = Value::Object(parameters.clone());
        for backend in candidates {
            let Some(descriptor) = backend.operation(&operation) else {
                continue;
            };
            match descriptor.validate_parameters(&parameters) {
                Ok(()) => {
                    let fingerprint = Fingerprint::new(
                        &backend.id,
                        &operation,
                        &parameters_value,
                        descriptor.idempotent,
                    );
                    accepted.push(Candidate {
                        backend,
                        fingerprint,
                    });
                }
                Err(e) => {
                    first_rejection.get_or_insert(e);
                }
            }
        }

        if accepted.is_empty() {
            return Err(first_rejection.unwrap_or_else(|| {
                AppError::NoMatchingOperation(format!(
                    "no backend provides operation '{}'",
                    operation
                ))
            }));
        }

        Ok(Resolved {
            operation,
            parameters: parameters_value,
            candidates: accepted,
        })
    }

    /// Map a translation onto registry operations
    ///
    /// The translator's candidate operation is used when some backend
    /// exposes it; otherwise each keyword of the text is searched in turn and
    /// the first matching operation wins.
    fn lookup_translated(
        &self,
        text: &str,
        translation: &Translation,
    ) -> AppResult<(String, Vec<Arc<BackendDescriptor>>)> {
        if let Some(operation) = &translation.candidate_operation {
            let candidates = self.registry.find_by_operation(operation);
            if !candidates.is_empty() {
                return Ok((operation.clone(), candidates));
            }
            tracing::debug!(
                operation = %operation,
                "Translated operation not registered, searching by keyword"
            );
        }

        for keyword in Translation::keywords(text) {
            let matches = self.registry.find_operations(&keyword);
            let found = matches
                .first()
                .and_then(|m| m.operations.first())
                .map(|op| op.name.clone());
            if let Some(operation) = found {
                let candidates = self.registry.find_by_operation(&operation);
                return Ok((operation, candidates));
            }
        }

        Err(AppError::NoMatchingOperation(format!(
            "nothing callable matches '{}' (intent {})",
            text, translation.intent
        )))
    }

    /// Select a backend and lease its connection
    ///
    /// A backend whose pool is exhausted is dropped and selection repeats
    /// over the rest. The breaker admission granted at selection is returned
    /// with the lease.
    fn select_and_acquire<'a>(
        &self,
        resolved: &'a Resolved,
        ctx: &RequestContext,
    ) -> AppResult<(&'a Candidate, Admission, PooledConnection)> {
        let all: Vec<Arc<BackendDescriptor>> = resolved
            .candidates
            .iter()
            .map(|c| Arc::clone(&c.backend))
            .collect();
        let mut remaining = all.clone();

        loop {
            let (backend, decision) = self
                .router
                .select(&resolved.operation, &remaining)
                .map_err(|e| match e {
                    AppError::CircuitOpen { .. } if all.len() > 1 => AppError::NoHealthyBackend {
                        operation: resolved.operation.clone(),
                        candidates: all.len(),
                    },
                    e => e,
                })?;

            match self.pool.acquire(&backend) {
                Ok(lease) => {
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        backend_id = %decision.backend_id,
                        strategy = decision.strategy_used.as_str(),
                        candidates = decision.candidates_considered,
                        "Routed request"
                    );
                    let candidate = resolved
                        .candidates
                        .iter()
                        .find(|c| c.backend.id == backend.id)
                        .ok_or_else(|| {
                            AppError::Internal(format!(
                                "router returned unknown backend '{}'",
                                backend.id
                            ))
                        })?;
                    return Ok((candidate, decision.admission, lease));
                }
                Err(e @ AppError::PoolExhausted { .. }) => {
                    self.breaker.abandon_trial(&backend.id, decision.admission);
                    remaining.retain(|b| b.id != backend.id);
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        backend_id = %backend.id,
                        remaining = remaining.len(),
                        "Pool exhausted, trying another backend"
                    );
                    if remaining.is_empty() {
                        return Err(if all.len() == 1 {
                            e
                        } else {
                            AppError::NoHealthyBackend {
                                operation: resolved.operation.clone(),
                                candidates: all.len(),
                            }
                        });
                    }
                }
                Err(e) => {
                    self.breaker.abandon_trial(&backend.id, decision.admission);
                    return Err(e);
                }
            }
        }
    }

    /// Fetch each backend's capability list and compare it with the registry
    ///
    /// Also builds the pooled handle for every backend ahead of traffic.
    pub async fn warm_up(&self) -> Vec<WarmUpReport> {
        let backends = self.registry.all();
        let reports = join_all(backends.iter().map(|backend| self.warm_backend(backend))).await;

        let failed = reports.iter().filter(|r| r.error.is_some()).count();
        tracing::info!(
            backends = reports.len(),
            failed,
            "Capability warm-up finished"
        );
        reports
    }

    async fn warm_backend(&self, backend: &Arc<BackendDescriptor>) -> WarmUpReport {
        let mut report = WarmUpReport {
            backend_id: backend.id.clone(),
            advertised: 0,
            missing: Vec::new(),
            error: None,
        };

        let lease = match self.pool.acquire(backend) {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(backend_id = %backend.id, error = %e, "Warm-up could not acquire a connection");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let result = lease.transport().capabilities().await;
        match &result {
            Ok(advertised) => {
                report.advertised = advertised.len();
                report.missing = backend
                    .operations
                    .iter()
                    .filter(|op| !advertised.contains(&op.name))
                    .map(|op| op.name.clone())
                    .collect();
                if !report.missing.is_empty() {
                    tracing::warn!(
                        backend_id = %backend.id,
                        missing = ?report.missing,
                        "Backend does not advertise every registered operation"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(backend_id = %backend.id, error = %e, "Capability check failed during warm-up");
                report.error = Some(e.to_string());
            }
        }
        self.pool.release(lease, CallOutcome::from_result(&result));
        report
    }

    /// Start registry refresh, pool sweep, cache sweep and health probes
    ///
    /// An interval of zero disables the corresponding task. Must be called
    /// from within a tokio runtime.
    pub fn spawn_background_tasks(&self, config: &Config) {
        if config.registry.refresh_interval_seconds > 0 {
            Arc::clone(&self.registry)
                .start_background_refresh(Duration::from_secs(config.registry.refresh_interval_seconds));
        }
        if config.pool.sweep_interval_seconds > 0 {
            Arc::clone(&self.pool)
                .start_idle_sweep(Duration::from_secs(config.pool.sweep_interval_seconds));
        }
        if self.cache.is_enabled() && config.cache.sweep_interval_seconds > 0 {
            Arc::clone(&self.cache)
                .start_sweep(Duration::from_secs(config.cache.sweep_interval_seconds));
        }
        if config.circuit_breaker.probe_interval_seconds > 0 {
            let prober = Arc::new(HealthProber::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.pool),
                Arc::clone(&self.breaker),
            ));
            prober.start(Duration::from_secs(config.circuit_breaker.probe_interval_seconds));
        }
    }

    /// Log-and-continue for metrics recording errors
    fn observe(&self, operation: &str, result: Result<(), prometheus::Error>) {
        if let Err(e) = result {
            self.metrics.metrics_recording_failure(operation);
            tracing::error!(
                operation,
                error = %e,
                "Metrics recording failed (non-fatal), request continues"
            );
        }
    }
}

/// Lease a fresh handle after the previous one was reported unusable
///
/// A handle that cannot be rebuilt is reported as a connect failure so the
/// attempt counts against the backend and stays retryable.
fn reacquire(
    pool: &ConnectionPool,
    backend: &Arc<BackendDescriptor>,
) -> AppResult<PooledConnection> {
    tracing::debug!(backend_id = %backend.id, "Rebuilding connection after fatal error");
    pool.acquire(backend).map_err(|e| AppError::Transport {
        backend_id: backend.id.clone(),
        failure: TransportFailure::Connect,
        message: format!("could not rebuild connection: {}", e),
    })
}
