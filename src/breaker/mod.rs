//! Per-backend circuit breaker
//!
//! CLOSED counts consecutive failures and opens at the threshold. OPEN
//! rejects everything until the reset timeout has elapsed, then admits a
//! single trial call and moves to HALF_OPEN. The trial's verdict closes or
//! reopens the circuit.
//!
//! The trial slot is an `AtomicBool` claimed by compare-and-swap, so two
//! concurrent callers can never both run a trial. The caller that claimed it
//! receives `Admission::Trial` and is the only one whose verdict or abandon
//! touches the slot.

pub mod probe;

pub use probe::HealthProber;

use crate::metrics::{CircuitTransition, Metrics};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How a call was let through the breaker
///
/// `Trial` is held by exactly one caller per HALF_OPEN circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Normal,
    Trial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitRecord {
    state: CircuitStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
struct Circuit {
    record: Mutex<CircuitRecord>,
    trial_in_flight: AtomicBool,
}

impl Circuit {
    fn closed() -> Self {
        Self {
            record: Mutex::new(CircuitRecord {
                state: CircuitStatus::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
            trial_in_flight: AtomicBool::new(false),
        }
    }

    fn claim_trial(&self) -> bool {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn clear_trial(&self) {
        self.trial_in_flight.store(false, Ordering::Release);
    }
}

/// Reported state of one backend's circuit
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub backend_id: String,
    pub state: CircuitStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub open_for_ms: Option<u64>,
    pub trial_in_flight: bool,
}

pub struct CircuitBreaker {
    circuits: DashMap<String, Arc<Circuit>>,
    failure_threshold: u32,
    reset_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            circuits: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Circuit for a backend, registered CLOSED on first sight
    fn circuit(&self, backend_id: &str) -> Arc<Circuit> {
        if let Some(circuit) = self.circuits.get(backend_id) {
            return Arc::clone(circuit.value());
        }
        Arc::clone(
            self.circuits
                .entry(backend_id.to_string())
                .or_insert_with(|| Arc::new(Circuit::closed()))
                .value(),
        )
    }

    fn reset_elapsed(&self, record: &CircuitRecord) -> bool {
        record
            .opened_at
            .is_none_or(|opened| opened.elapsed() >= self.reset_timeout)
    }

    /// Admit a call, consuming the trial slot when one is granted
    ///
    /// Returns `None` when the circuit refuses the call. The returned
    /// admission must be handed back with the call's verdict so that only
    /// the trial holder can settle or release a HALF_OPEN circuit.
    pub fn allow_request(&self, backend_id: &str) -> Option<Admission> {
        let circuit = self.circuit(backend_id);
        let mut record = circuit.record.lock();
        match record.state {
            CircuitStatus::Closed => Some(Admission::Normal),
            CircuitStatus::Open => {
                if !self.reset_elapsed(&record) || !circuit.claim_trial() {
                    return None;
                }
                record.state = CircuitStatus::HalfOpen;
                drop(record);
                tracing::info!(backend_id = %backend_id, "Circuit half-open, admitting trial call");
                self.note_transition(backend_id, CircuitTransition::HalfOpened);
                Some(Admission::Trial)
            }
            CircuitStatus::HalfOpen => circuit.claim_trial().then_some(Admission::Trial),
        }
    }

    /// Whether `allow_request` would currently admit a call, without
    /// consuming anything
    pub fn would_allow(&self, backend_id: &str) -> bool {
        let circuit = self.circuit(backend_id);
        let record = circuit.record.lock();
        match record.state {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                self.reset_elapsed(&record) && !circuit.trial_in_flight.load(Ordering::Acquire)
            }
            CircuitStatus::HalfOpen => !circuit.trial_in_flight.load(Ordering::Acquire),
        }
    }

    /// OPEN circuits whose reset timeout has elapsed and whose trial slot is free
    pub(crate) fn probe_due(&self, backend_id: &str) -> bool {
        let circuit = self.circuit(backend_id);
        let record = circuit.record.lock();
        record.state == CircuitStatus::Open
            && self.reset_elapsed(&record)
            && !circuit.trial_in_flight.load(Ordering::Acquire)
    }

    /// Record a successful call made under `admission`
    ///
    /// Only a trial success closes a HALF_OPEN circuit. A normal call that
    /// was admitted before the circuit opened updates the counters only.
    pub fn record_success(&self, backend_id: &str, admission: Admission) {
        let circuit = self.circuit(backend_id);
        let mut record = circuit.record.lock();
        record.consecutive_failures = 0;
        record.consecutive_successes = record.consecutive_successes.saturating_add(1);

        if admission == Admission::Trial {
            let was_half_open = record.state == CircuitStatus::HalfOpen;
            if was_half_open {
                record.state = CircuitStatus::Closed;
                record.opened_at = None;
            }
            circuit.clear_trial();
            drop(record);
            if was_half_open {
                tracing::info!(backend_id = %backend_id, "Circuit closed after successful trial");
                self.note_transition(backend_id, CircuitTransition::Closed);
            }
        }
    }

    /// Record a failed call made under `admission`
    ///
    /// A normal failure can open a CLOSED circuit but never touches a
    /// HALF_OPEN one; only the trial holder's failure reopens it.
    pub fn record_failure(&self, backend_id: &str, admission: Admission) {
        let circuit = self.circuit(backend_id);
        let mut record = circuit.record.lock();
        record.consecutive_successes = 0;
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);

        match (admission, record.state) {
            (Admission::Normal, CircuitStatus::Closed)
                if record.consecutive_failures >= self.failure_threshold =>
            {
                record.state = CircuitStatus::Open;
                record.opened_at = Some(Instant::now());
                let failures = record.consecutive_failures;
                drop(record);
                tracing::warn!(
                    backend_id = %backend_id,
                    consecutive_failures = failures,
                    reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                    "Circuit opened"
                );
                self.note_transition(backend_id, CircuitTransition::Opened);
            }
            (Admission::Trial, CircuitStatus::HalfOpen) => {
                record.state = CircuitStatus::Open;
                record.opened_at = Some(Instant::now());
                circuit.clear_trial();
                drop(record);
                tracing::warn!(backend_id = %backend_id, "Trial call failed, circuit reopened");
                self.note_transition(backend_id, CircuitTransition::Opened);
            }
            (Admission::Trial, _) => {
                circuit.clear_trial();
            }
            (Admission::Normal, _) => {
                tracing::debug!(
                    backend_id = %backend_id,
                    consecutive_failures = record.consecutive_failures,
                    state = ?record.state,
                    "Backend failure recorded"
                );
            }
        }
    }

    /// Release a trial slot without a verdict
    ///
    /// A no-op for normal admissions. The circuit stays HALF_OPEN so the
    /// next caller may run the trial.
    pub fn abandon_trial(&self, backend_id: &str, admission: Admission) {
        if admission != Admission::Trial {
            return;
        }
        let circuit = self.circuit(backend_id);
        let _record = circuit.record.lock();
        circuit.clear_trial();
        tracing::debug!(backend_id = %backend_id, "Trial call abandoned");
    }

    pub fn state(&self, backend_id: &str) -> CircuitStatus {
        self.circuit(backend_id).record.lock().state
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> = self
            .circuits
            .iter()
            .map(|entry| {
                let record = entry.record.lock();
                CircuitSnapshot {
                    backend_id: entry.key().clone(),
                    state: record.state,
                    consecutive_failures: record.consecutive_failures,
                    consecutive_successes: record.consecutive_successes,
                    open_for_ms: record
                        .opened_at
                        .map(|opened| opened.elapsed().as_millis() as u64),
                    trial_in_flight: entry.trial_in_flight.load(Ordering::Acquire),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        snapshots
    }

    fn note_transition(&self, backend_id: &str, transition: CircuitTransition) {
        if let Some(metrics) = &self.metrics {
            if let Err(e) = metrics.record_circuit_transition(backend_id, transition) {
                tracing::warn!(
                    backend_id = %backend_id,
                    error = %e,
                    "Failed to record circuit transition metric"
                );
                metrics.metrics_recording_failure("record_circuit_transition");
            }
        }
    }
}
