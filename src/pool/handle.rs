//! Pooled connection handles and leases

use crate::registry::BackendDescriptor;
use crate::transport::BackendTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// One reusable transport for one backend
pub struct ConnectionHandle {
    backend: Arc<BackendDescriptor>,
    transport: Arc<dyn BackendTransport>,
    created_at: Instant,
    last_used_at: Mutex<Instant>,
    healthy: AtomicBool,
    in_flight: AtomicUsize,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("backend_id", &self.backend.id)
            .field("healthy", &self.is_healthy())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl ConnectionHandle {
    pub fn new(backend: Arc<BackendDescriptor>, transport: Arc<dyn BackendTransport>) -> Self {
        let now = Instant::now();
        Self {
            backend,
            transport,
            created_at: now,
            last_used_at: Mutex::new(now),
            healthy: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn backend_id(&self) -> &str {
        &self.backend.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.lock().elapsed()
    }

    /// Whether this handle was built for the same endpoint settings
    pub(crate) fn serves(&self, backend: &BackendDescriptor) -> bool {
        self.backend.base_address == backend.base_address
            && self.backend.timeout_ms == backend.timeout_ms
            && self.backend.headers == backend.headers
    }

    fn touch(&self) {
        *self.last_used_at.lock() = Instant::now();
    }

    /// Take a lease, respecting an optional in-flight limit
    ///
    /// Returns `None` when the limit is reached.
    pub fn try_lease(self: &Arc<Self>, limit: Option<usize>) -> Option<PooledConnection> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if limit.is_some_and(|max| current >= max) {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.touch();
        Some(PooledConnection {
            handle: Arc::clone(self),
        })
    }
}

/// A borrowed handle counted in the backend's in-flight total
///
/// Dropping the lease decrements in-flight; the pool's `release` additionally
/// applies the call outcome.
#[derive(Debug)]
pub struct PooledConnection {
    handle: Arc<ConnectionHandle>,
}

impl PooledConnection {
    pub fn transport(&self) -> &dyn BackendTransport {
        self.handle.transport.as_ref()
    }

    pub fn backend_id(&self) -> &str {
        self.handle.backend_id()
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.handle.touch();
        self.handle.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, Reply, descriptor};
    use serde_json::json;

    fn handle() -> Arc<ConnectionHandle> {
        Arc::new(ConnectionHandle::new(
            Arc::new(descriptor("files-1")),
            Arc::new(MockTransport::new("files-1", Reply::Data(json!(null)))),
        ))
    }

    #[test]
    fn test_lease_counts_in_flight_until_dropped() {
        let handle = handle();
        let first = handle.try_lease(None).unwrap();
        let second = handle.try_lease(None).unwrap();
        assert_eq!(handle.in_flight(), 2);
        drop(first);
        assert_eq!(handle.in_flight(), 1);
        drop(second);
        assert_eq!(handle.in_flight(), 0);
    }

    #[test]
    fn test_lease_respects_limit() {
        let handle = handle();
        let lease = handle.try_lease(Some(1)).unwrap();
        assert!(handle.try_lease(Some(1)).is_none());
        drop(lease);
        assert!(handle.try_lease(Some(1)).is_some());
    }

    #[test]
    fn test_lease_debug_names_backend() {
        let handle = handle();
        let lease = handle.try_lease(None).unwrap();
        let rendered = format!("{:?}", lease);
        assert!(rendered.contains("files-1"), "{}", rendered);
        assert!(rendered.contains("in_flight: 1"), "{}", rendered);
    }

    #[test]
    fn test_mark_unhealthy() {
        let handle = handle();
        assert!(handle.is_healthy());
        handle.mark_unhealthy();
        assert!(!handle.is_healthy());
    }

    #[test]
    fn test_serves_detects_endpoint_change() {
        let handle = handle();
        let mut moved = descriptor("files-1");
        assert!(handle.serves(&moved));
        moved.base_address = "http://elsewhere.invalid".to_string();
        assert!(!handle.serves(&moved));
    }
}
