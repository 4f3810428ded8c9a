//! Retry executor with jittered exponential backoff
//!
//! Every attempt's outcome is reported to the circuit breaker. Attempts after
//! the first must be admitted by the breaker again, so a circuit that opens
//! mid-retry stops the loop.

use crate::breaker::{Admission, CircuitBreaker};
use crate::config::RetryConfig;
use crate::error::{AppError, AppResult};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default maximum number of attempts
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Default base backoff in milliseconds (doubles each retry)
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
/// Default cap on a single backoff delay
pub const MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    /// # Errors
    /// Returns an error if `max_attempts` is 0
    pub fn new(max_attempts: usize, base_delay_ms: u64) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::Config(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: MAX_BACKOFF_MS,
        })
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn from_config(config: &RetryConfig) -> AppResult<Self> {
        Ok(Self::new(config.max_attempts, config.base_delay_ms)?
            .with_max_delay_ms(config.max_delay_ms))
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Delay before retry `retry` (1 for the gap after the first attempt)
    ///
    /// `base * 2^(retry-1)` plus jitter uniform in `[0, base)`, capped at
    /// `max_delay_ms`.
    pub fn delay_for(&self, retry: usize) -> Duration {
        let jitter = if self.base_delay_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.base_delay_ms)
        };
        Duration::from_millis(
            calculate_backoff(self.base_delay_ms, retry)
                .saturating_add(jitter)
                .min(self.max_delay_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: MAX_BACKOFF_MS,
        }
    }
}

/// Exponential part of the backoff, without jitter or cap
///
/// With base=100ms: retry 1 is 100ms, retry 2 is 200ms, retry 3 is 400ms.
pub fn calculate_backoff(base_delay_ms: u64, retry: usize) -> u64 {
    let exponent = u32::try_from(retry.saturating_sub(1)).unwrap_or(u32::MAX);
    base_delay_ms.saturating_mul(2_u64.saturating_pow(exponent))
}

/// Run `future` unless the token fires or the deadline passes first
async fn run_or_cancel<F: Future>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    future: F,
) -> Option<F::Output> {
    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        _ = expired => None,
        output = future => Some(output),
    }
}

pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { policy, breaker }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` against `backend_id` with retries
    ///
    /// The caller must already hold admission for the first attempt (the
    /// router's `allow_request`) and passes it as `admission`. Each retry is
    /// admitted again and reports its verdict under its own admission, so a
    /// trial slot is only ever settled or released by the call that holds
    /// it. `operation` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// - the operation's own error when it is not retryable
    /// - `RetriesExhausted` once every attempt failed with retryable errors
    /// - `CircuitOpen` when the breaker refuses a retry
    /// - `Cancelled` when the token fires or the deadline passes
    pub async fn execute<T, F, Fut>(
        &self,
        backend_id: &str,
        admission: Admission,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> AppResult<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        let mut admission = admission;
        loop {
            if attempt > 1 {
                let Some(granted) = self.breaker.allow_request(backend_id) else {
                    tracing::debug!(
                        backend_id = %backend_id,
                        attempt,
                        "Circuit refused retry"
                    );
                    return Err(AppError::CircuitOpen {
                        backend_id: backend_id.to_string(),
                    });
                };
                admission = granted;
            }

            let Some(result) = run_or_cancel(cancel, deadline, operation(attempt)).await else {
                self.breaker.abandon_trial(backend_id, admission);
                tracing::debug!(backend_id = %backend_id, attempt, "Call cancelled");
                return Err(AppError::Cancelled);
            };

            let error = match result {
                Ok(value) => {
                    self.breaker.record_success(backend_id, admission);
                    return Ok(value);
                }
                Err(error) => error,
            };

            if error.counts_as_backend_failure() {
                self.breaker.record_failure(backend_id, admission);
            } else {
                self.breaker.record_success(backend_id, admission);
            }

            if !error.is_retryable() {
                return Err(error);
            }

            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    backend_id = %backend_id,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(AppError::RetriesExhausted {
                    backend_id: backend_id.to_string(),
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(attempt);
            tracing::info!(
                backend_id = %backend_id,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable failure, backing off"
            );

            if run_or_cancel(cancel, deadline, tokio::time::sleep(delay))
                .await
                .is_none()
            {
                return Err(AppError::Cancelled);
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitStatus;
    use crate::error::TransportFailure;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transport(failure: TransportFailure) -> AppError {
        AppError::Transport {
            backend_id: "files-1".to_string(),
            failure,
            message: "scripted".to_string(),
        }
    }

    fn executor(max_attempts: usize, threshold: u32) -> (Arc<CircuitBreaker>, RetryExecutor) {
        let breaker = Arc::new(CircuitBreaker::new(threshold, Duration::from_secs(60)));
        let policy = RetryPolicy::new(max_attempts, 1).unwrap();
        (Arc::clone(&breaker), RetryExecutor::new(policy, breaker))
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(RetryPolicy::new(0, 100).is_err());
    }

    #[test]
    fn test_calculate_backoff_doubles() {
        assert_eq!(calculate_backoff(100, 1), 100);
        assert_eq!(calculate_backoff(100, 2), 200);
        assert_eq!(calculate_backoff(100, 3), 400);
    }

    #[test]
    fn test_calculate_backoff_saturates() {
        assert_eq!(calculate_backoff(u64::MAX, 5), u64::MAX);
        assert_eq!(calculate_backoff(100, 200), u64::MAX);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(20, 1000).unwrap().with_max_delay_ms(5000);
        assert_eq!(policy.delay_for(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_zero_base_has_no_jitter() {
        let policy = RetryPolicy::new(3, 0).unwrap();
        assert_eq!(policy.delay_for(3), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_delay_within_jitter_window(base in 1u64..1000, retry in 1usize..8) {
            let policy = RetryPolicy::new(10, base).unwrap().with_max_delay_ms(u64::MAX);
            let delay = policy.delay_for(retry).as_millis() as u64;
            let floor = base * 2u64.pow(retry as u32 - 1);
            prop_assert!(delay >= floor);
            prop_assert!(delay < floor + base);
        }
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let (breaker, executor) = executor(3, 10);
        let calls = AtomicUsize::new(0);

        let result = executor
            .execute("files-1", Admission::Normal, &CancellationToken::new(), None, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(transport(TransportFailure::Timeout))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state("files-1"), CircuitStatus::Closed);
        assert_eq!(breaker.snapshot()[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let (_, executor) = executor(3, 10);
        let calls = AtomicUsize::new(0);

        let err = executor
            .execute::<(), _, _>("files-1", Admission::Normal, &CancellationToken::new(), None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transport(TransportFailure::Status(503))) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            AppError::RetriesExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    *last_error,
                    AppError::Transport { failure: TransportFailure::Status(503), .. }
                ));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let (breaker, executor) = executor(5, 10);
        let calls = AtomicUsize::new(0);

        let err = executor
            .execute::<(), _, _>("files-1", Admission::Normal, &CancellationToken::new(), None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(AppError::Backend {
                        backend_id: "files-1".to_string(),
                        message: "no such file".to_string(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, AppError::Backend { .. }));
        assert_eq!(
            breaker.snapshot()[0].consecutive_failures,
            0,
            "a declared failure proves the backend is alive"
        );
    }

    #[tokio::test]
    async fn test_circuit_opening_mid_retry_stops_loop() {
        let (breaker, executor) = executor(5, 2);
        let calls = AtomicUsize::new(0);

        let err = executor
            .execute::<(), _, _>("files-1", Admission::Normal, &CancellationToken::new(), None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transport(TransportFailure::Connect)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, AppError::CircuitOpen { .. }));
        assert_eq!(breaker.state("files-1"), CircuitStatus::Open);
    }

    #[tokio::test]
    async fn test_cancellation_during_attempt() {
        let (_, executor) = executor(3, 10);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let err = executor
            .execute::<(), _, _>("files-1", Admission::Normal, &cancel, None, |_| {
                trigger.cancel();
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline_stops_backoff() {
        let breaker = Arc::new(CircuitBreaker::new(10, Duration::from_secs(60)));
        let executor = RetryExecutor::new(RetryPolicy::new(5, 10_000).unwrap(), breaker);
        let calls = AtomicUsize::new(0);
        let deadline = Instant::now() + Duration::from_millis(50);

        let started = std::time::Instant::now();
        let err = executor
            .execute::<(), _, _>("files-1", Admission::Normal, &CancellationToken::new(), Some(deadline), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transport(TransportFailure::Timeout)) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no attempt after the deadline");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    fn shared_executor(reset: Duration) -> (Arc<CircuitBreaker>, Arc<RetryExecutor>) {
        let breaker = Arc::new(CircuitBreaker::new(1, reset));
        let policy = RetryPolicy::new(1, 1).unwrap();
        (
            Arc::clone(&breaker),
            Arc::new(RetryExecutor::new(policy, breaker)),
        )
    }

    #[tokio::test]
    async fn test_cancelled_normal_call_leaves_foreign_trial_held() {
        let (breaker, executor) = shared_executor(Duration::from_millis(10));
        let admission = breaker.allow_request("files-1").unwrap();
        assert_eq!(admission, Admission::Normal);

        let cancel = CancellationToken::new();
        let call = tokio::spawn({
            let executor = Arc::clone(&executor);
            let cancel = cancel.clone();
            async move {
                executor
                    .execute::<(), _, _>("files-1", admission, &cancel, None, |_| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(())
                    })
                    .await
            }
        });

        // Another call fails and opens the circuit while the first is in flight
        breaker.record_failure("files-1", Admission::Normal);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.allow_request("files-1"), Some(Admission::Trial));

        cancel.cancel();
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::Cancelled));

        assert_eq!(
            breaker.allow_request("files-1"),
            None,
            "the trial is still held by its owner"
        );
        assert_eq!(breaker.state("files-1"), CircuitStatus::HalfOpen);
    }

    #[tokio::test]
    async fn test_late_normal_failure_leaves_foreign_trial_held() {
        let (breaker, executor) = shared_executor(Duration::from_millis(10));
        let admission = breaker.allow_request("files-1").unwrap();

        let call = tokio::spawn({
            let executor = Arc::clone(&executor);
            async move {
                executor
                    .execute::<(), _, _>(
                        "files-1",
                        admission,
                        &CancellationToken::new(),
                        None,
                        |_| async {
                            tokio::time::sleep(Duration::from_millis(80)).await;
                            Err(transport(TransportFailure::Timeout))
                        },
                    )
                    .await
            }
        });

        breaker.record_failure("files-1", Admission::Normal);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.allow_request("files-1"), Some(Admission::Trial));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(breaker.allow_request("files-1"), None);
        assert_eq!(breaker.state("files-1"), CircuitStatus::HalfOpen);
    }

    #[tokio::test]
    async fn test_cancelled_trial_frees_slot() {
        let (breaker, executor) = shared_executor(Duration::from_millis(10));
        breaker.record_failure("files-1", Admission::Normal);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let admission = breaker.allow_request("files-1").unwrap();
        assert_eq!(admission, Admission::Trial);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = executor
            .execute::<(), _, _>("files-1", admission, &cancel, None, |_| async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(breaker.allow_request("files-1"), Some(Admission::Trial));
    }
}
