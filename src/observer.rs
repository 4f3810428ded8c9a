//! Request outcome observation
//!
//! The orchestrator emits one [`OutcomeRecord`] per request into an
//! [`OutcomeSink`]. The production sink is a bounded channel drained by a
//! collector task into a [`StateStore`]; emitting never blocks or fails the
//! request, and a full channel drops the record with a warning.

use crate::error::ErrorKind;
use crate::metrics::Metrics;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Outcome of one processed request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRecord {
    pub request_id: String,
    pub backend_id: Option<String>,
    pub operation: Option<String>,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub latency_ms: f64,
    pub cache_hit: bool,
    pub recorded_at: SystemTime,
}

/// Receiver of outcome records
///
/// Implementations must return promptly; the orchestrator calls `record`
/// on the request path.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, record: OutcomeRecord);
}

/// Bounded channel writer
pub struct ChannelSink {
    sender: mpsc::Sender<OutcomeRecord>,
    metrics: Arc<Metrics>,
}

impl ChannelSink {
    /// Create the sink and the receiving end for [`spawn_collector`]
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> (Self, mpsc::Receiver<OutcomeRecord>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, metrics }, receiver)
    }
}

impl OutcomeSink for ChannelSink {
    fn record(&self, record: OutcomeRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                self.metrics.outcome_record_dropped();
                tracing::warn!(
                    request_id = %record.request_id,
                    capacity = self.sender.max_capacity(),
                    "Outcome channel full, dropping record"
                );
            }
            Err(TrySendError::Closed(record)) => {
                self.metrics.outcome_record_dropped();
                tracing::warn!(
                    request_id = %record.request_id,
                    "Outcome collector is gone, dropping record"
                );
            }
        }
    }
}

/// Aggregated counters for one backend
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendStats {
    pub backend_id: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub average_latency_ms: f64,
}

/// Storage for observed outcomes
pub trait StateStore: Send + Sync {
    fn apply(&self, record: OutcomeRecord);

    /// Per-backend aggregates, ordered by backend id
    fn backend_stats(&self) -> Vec<BackendStats>;

    /// Most recent records, newest last
    fn recent(&self, limit: usize) -> Vec<OutcomeRecord>;

    fn total_requests(&self) -> u64;
}

#[derive(Debug, Default)]
struct Aggregate {
    requests: u64,
    successes: u64,
    failures: u64,
    cache_hits: u64,
    latency_sum_ms: f64,
}

#[derive(Debug)]
struct StoreInner {
    backends: BTreeMap<String, Aggregate>,
    history: VecDeque<OutcomeRecord>,
    total: u64,
}

/// [`StateStore`] kept in process memory with a bounded history
#[derive(Debug)]
pub struct InMemoryStateStore {
    inner: Mutex<StoreInner>,
    history_limit: usize,
}

impl InMemoryStateStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                backends: BTreeMap::new(),
                history: VecDeque::with_capacity(history_limit.min(1024)),
                total: 0,
            }),
            history_limit,
        }
    }
}

impl StateStore for InMemoryStateStore {
    fn apply(&self, record: OutcomeRecord) {
        let mut inner = self.inner.lock();
        inner.total += 1;

        if let Some(backend_id) = &record.backend_id {
            let aggregate = inner.backends.entry(backend_id.clone()).or_default();
            aggregate.requests += 1;
            if record.success {
                aggregate.successes += 1;
            } else {
                aggregate.failures += 1;
            }
            if record.cache_hit {
                aggregate.cache_hits += 1;
            }
            if record.latency_ms.is_finite() && record.latency_ms >= 0.0 {
                aggregate.latency_sum_ms += record.latency_ms;
            }
        }

        if self.history_limit > 0 {
            if inner.history.len() == self.history_limit {
                inner.history.pop_front();
            }
            inner.history.push_back(record);
        }
    }

    fn backend_stats(&self) -> Vec<BackendStats> {
        self.inner
            .lock()
            .backends
            .iter()
            .map(|(id, aggregate)| BackendStats {
                backend_id: id.clone(),
                requests: aggregate.requests,
                successes: aggregate.successes,
                failures: aggregate.failures,
                cache_hits: aggregate.cache_hits,
                average_latency_ms: if aggregate.requests == 0 {
                    0.0
                } else {
                    aggregate.latency_sum_ms / aggregate.requests as f64
                },
            })
            .collect()
    }

    fn recent(&self, limit: usize) -> Vec<OutcomeRecord> {
        let inner = self.inner.lock();
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    fn total_requests(&self) -> u64 {
        self.inner.lock().total
    }
}

/// Drain `receiver` into `store` until every sender is dropped
pub fn spawn_collector(
    mut receiver: mpsc::Receiver<OutcomeRecord>,
    store: Arc<dyn StateStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("Outcome collector started");
        while let Some(record) = receiver.recv().await {
            store.apply(record);
        }
        tracing::info!("Outcome channel closed, collector stopping");
    })
}
