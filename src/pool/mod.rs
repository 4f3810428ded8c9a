//! Connection pool
//!
//! One handle per backend, created on first use and shared by every logical
//! call to that backend. Handles are rebuilt after a fatal transport error or
//! when the registry changes the backend's endpoint settings.

pub mod handle;

pub use handle::{ConnectionHandle, PooledConnection};

use crate::error::{AppError, AppResult};
use crate::registry::BackendDescriptor;
use crate::transport::TransportFactory;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// How a leased call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// The call failed but the handle is still usable
    Failed,
    /// The transport reported the handle unusable
    Fatal,
    Cancelled,
}

impl CallOutcome {
    pub fn from_error(error: &AppError) -> Self {
        match error {
            AppError::Cancelled => CallOutcome::Cancelled,
            AppError::RetriesExhausted { last_error, .. } => Self::from_error(last_error),
            e if e.is_fatal_to_handle() => CallOutcome::Fatal,
            _ => CallOutcome::Failed,
        }
    }

    pub fn from_result<T>(result: &AppResult<T>) -> Self {
        match result {
            Ok(_) => CallOutcome::Success,
            Err(e) => Self::from_error(e),
        }
    }
}

/// Point-in-time view of one pooled handle
#[derive(Debug, Clone, Serialize)]
pub struct HandleStatus {
    pub backend_id: String,
    pub healthy: bool,
    pub in_flight: usize,
    pub idle_ms: u64,
}

pub struct ConnectionPool {
    handles: DashMap<String, Arc<ConnectionHandle>>,
    factory: Arc<dyn TransportFactory>,
    idle_timeout: Duration,
    max_in_flight: Option<usize>,
}

impl ConnectionPool {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        idle_timeout: Duration,
        max_in_flight: Option<usize>,
    ) -> Self {
        Self {
            handles: DashMap::new(),
            factory,
            idle_timeout,
            max_in_flight,
        }
    }

    /// Lease the backend's handle, building it if needed
    ///
    /// # Errors
    ///
    /// `PoolExhausted` when the in-flight limit is reached, or whatever the
    /// transport factory reports when a handle cannot be built.
    pub fn acquire(&self, backend: &Arc<BackendDescriptor>) -> AppResult<PooledConnection> {
        let handle = self.handle_for(backend)?;

        handle
            .try_lease(self.max_in_flight)
            .ok_or_else(|| AppError::PoolExhausted {
                backend_id: backend.id.clone(),
                limit: self.max_in_flight.unwrap_or(usize::MAX),
            })
    }

    fn handle_for(&self, backend: &Arc<BackendDescriptor>) -> AppResult<Arc<ConnectionHandle>> {
        if let Some(existing) = self.handles.get(&backend.id) {
            if existing.is_healthy() && existing.serves(backend) {
                return Ok(Arc::clone(existing.value()));
            }
        }

        // Build outside the map lock; another caller may win the insert
        let transport = self.factory.build(backend)?;
        let fresh = Arc::new(ConnectionHandle::new(Arc::clone(backend), transport));

        let handle = match self.handles.entry(backend.id.clone()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if current.is_healthy() && current.serves(backend) {
                    Arc::clone(current)
                } else {
                    slot.insert(Arc::clone(&fresh));
                    fresh
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&fresh));
                tracing::debug!(backend_id = %backend.id, "Created pooled connection");
                fresh
            }
        };
        Ok(handle)
    }

    /// Return a lease and apply the call outcome
    ///
    /// A fatal outcome marks the handle unhealthy and evicts it, unless the
    /// map already holds a newer handle.
    pub fn release(&self, lease: PooledConnection, outcome: CallOutcome) {
        if outcome == CallOutcome::Fatal {
            let handle = Arc::clone(lease.handle());
            handle.mark_unhealthy();
            let evicted = self
                .handles
                .remove_if(handle.backend_id(), |_, current| Arc::ptr_eq(current, &handle))
                .is_some();
            tracing::warn!(
                backend_id = %handle.backend_id(),
                evicted,
                "Pooled connection reported unusable, evicting"
            );
        }
        drop(lease);
    }

    /// Drop the backend's handle; outstanding leases keep it alive until done
    pub fn evict(&self, backend_id: &str) -> bool {
        self.handles.remove(backend_id).is_some()
    }

    pub fn in_flight(&self, backend_id: &str) -> usize {
        self.handles
            .get(backend_id)
            .map(|h| h.in_flight())
            .unwrap_or(0)
    }

    /// Whether the backend's handle is usable; backends without one count as healthy
    pub fn is_healthy(&self, backend_id: &str) -> bool {
        self.handles
            .get(backend_id)
            .map(|h| h.is_healthy())
            .unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Remove handles with no in-flight calls that have been idle too long
    pub fn sweep_idle(&self) -> usize {
        let before = self.handles.len();
        let idle_timeout = self.idle_timeout;
        self.handles
            .retain(|_, handle| handle.in_flight() > 0 || handle.idle_for() < idle_timeout);
        let removed = before.saturating_sub(self.handles.len());
        if removed > 0 {
            tracing::debug!(removed, "Swept idle pooled connections");
        }
        removed
    }

    pub fn status(&self) -> Vec<HandleStatus> {
        let mut statuses: Vec<HandleStatus> = self
            .handles
            .iter()
            .map(|entry| HandleStatus {
                backend_id: entry.key().clone(),
                healthy: entry.is_healthy(),
                in_flight: entry.in_flight(),
                idle_ms: entry.idle_for().as_millis() as u64,
            })
            .collect();
        statuses.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        statuses
    }

    pub fn start_idle_sweep(self: Arc<Self>, interval: Duration) {
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                "Starting background pool idle sweep"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep_idle();
            }
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(_) => tracing::error!(
                    "Background pool idle sweep task terminated unexpectedly. \
                    Idle connections will no longer be evicted."
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    "Background pool idle sweep task panicked. \
                    Idle connections will no longer be evicted."
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportFailure;
    use crate::transport::mock::{MockFactory, MockTransport, Reply, descriptor};
    use serde_json::json;

    fn pool_with(ids: &[&str], max_in_flight: Option<usize>) -> (Arc<MockFactory>, ConnectionPool) {
        let factory = Arc::new(MockFactory::new());
        for id in ids {
            factory.register(MockTransport::new(id, Reply::Data(json!("ok"))));
        }
        let pool = ConnectionPool::new(factory.clone(), Duration::from_secs(60), max_in_flight);
        (factory, pool)
    }

    #[test]
    fn test_acquire_reuses_one_handle_per_backend() {
        let (factory, pool) = pool_with(&["files-1"], None);
        let backend = Arc::new(descriptor("files-1"));

        let first = pool.acquire(&backend).unwrap();
        let second = pool.acquire(&backend).unwrap();

        assert!(Arc::ptr_eq(first.handle(), second.handle()));
        assert_eq!(factory.builds(), 1);
        assert_eq!(pool.in_flight("files-1"), 2);
    }

    #[test]
    fn test_release_decrements_in_flight() {
        let (_, pool) = pool_with(&["files-1"], None);
        let backend = Arc::new(descriptor("files-1"));
        let lease = pool.acquire(&backend).unwrap();
        pool.release(lease, CallOutcome::Success);
        assert_eq!(pool.in_flight("files-1"), 0);
        assert_eq!(pool.len(), 1, "handle is kept for reuse");
    }

    #[test]
    fn test_fatal_release_evicts_and_next_acquire_rebuilds() {
        let (factory, pool) = pool_with(&["files-1"], None);
        let backend = Arc::new(descriptor("files-1"));

        let lease = pool.acquire(&backend).unwrap();
        let old = Arc::clone(lease.handle());
        pool.release(lease, CallOutcome::Fatal);

        assert!(!old.is_healthy());
        assert!(pool.is_empty());

        let lease = pool.acquire(&backend).unwrap();
        assert!(!Arc::ptr_eq(&old, lease.handle()));
        assert_eq!(factory.builds(), 2);
    }

    #[test]
    fn test_cancelled_release_keeps_handle() {
        let (_, pool) = pool_with(&["files-1"], None);
        let backend = Arc::new(descriptor("files-1"));
        let lease = pool.acquire(&backend).unwrap();
        let handle = Arc::clone(lease.handle());
        pool.release(lease, CallOutcome::Cancelled);
        assert!(handle.is_healthy());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_stale_fatal_release_does_not_evict_newer_handle() {
        let (_, pool) = pool_with(&["files-1"], None);
        let backend = Arc::new(descriptor("files-1"));

        let stale = pool.acquire(&backend).unwrap();
        pool.evict("files-1");
        let fresh = pool.acquire(&backend).unwrap();
        let fresh_handle = Arc::clone(fresh.handle());

        pool.release(stale, CallOutcome::Fatal);
        assert_eq!(pool.len(), 1);
        assert!(fresh_handle.is_healthy());
        pool.release(fresh, CallOutcome::Success);
    }

    #[test]
    fn test_in_flight_limit_reports_pool_exhausted() {
        let (_, pool) = pool_with(&["files-1"], Some(1));
        let backend = Arc::new(descriptor("files-1"));

        let lease = pool.acquire(&backend).unwrap();
        let err = pool.acquire(&backend).unwrap_err();
        assert!(matches!(err, AppError::PoolExhausted { limit: 1, .. }));

        drop(lease);
        assert!(pool.acquire(&backend).is_ok());
    }

    #[test]
    fn test_endpoint_change_rebuilds_handle() {
        let (factory, pool) = pool_with(&["files-1"], None);
        let backend = Arc::new(descriptor("files-1"));
        drop(pool.acquire(&backend).unwrap());

        let mut moved = descriptor("files-1");
        moved.timeout_ms = 5000;
        drop(pool.acquire(&Arc::new(moved)).unwrap());

        assert_eq!(factory.builds(), 2);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_sweep_keeps_busy_and_recent_handles() {
        let factory = Arc::new(MockFactory::new());
        factory.register(MockTransport::new("a", Reply::Data(json!(1))));
        factory.register(MockTransport::new("b", Reply::Data(json!(1))));
        let pool = ConnectionPool::new(factory, Duration::ZERO, None);

        let busy = pool.acquire(&Arc::new(descriptor("a"))).unwrap();
        drop(pool.acquire(&Arc::new(descriptor("b"))).unwrap());

        assert_eq!(pool.sweep_idle(), 1);
        assert_eq!(pool.in_flight("a"), 1);
        assert_eq!(pool.in_flight("b"), 0);
        drop(busy);
    }

    #[test]
    fn test_unknown_backend_counts_as_healthy() {
        let (_, pool) = pool_with(&[], None);
        assert!(pool.is_healthy("nobody"));
        assert_eq!(pool.in_flight("nobody"), 0);
    }

    #[test]
    fn test_call_outcome_classification() {
        let fatal = AppError::Transport {
            backend_id: "a".to_string(),
            failure: TransportFailure::Connect,
            message: "reset".to_string(),
        };
        let exhausted = AppError::RetriesExhausted {
            backend_id: "a".to_string(),
            attempts: 3,
            last_error: Box::new(fatal),
        };
        assert_eq!(CallOutcome::from_error(&exhausted), CallOutcome::Fatal);
        assert_eq!(CallOutcome::from_error(&AppError::Cancelled), CallOutcome::Cancelled);
        assert_eq!(
            CallOutcome::from_result::<()>(&Err(AppError::Validation("x".to_string()))),
            CallOutcome::Failed
        );
        assert_eq!(CallOutcome::from_result(&Ok(1)), CallOutcome::Success);
    }
}
