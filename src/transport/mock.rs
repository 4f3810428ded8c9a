//! Scripted in-process transport for unit tests

use super::{BackendTransport, TransportFactory};
use crate::error::{AppError, AppResult, TransportFailure};
use crate::registry::BackendDescriptor;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Data(Value),
    Declined(String),
    Fail(TransportFailure),
    Slow(Duration, Value),
}

/// Transport that answers from a script, then from a fallback reply
pub struct MockTransport {
    backend_id: String,
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    calls: AtomicUsize,
    capability_calls: AtomicUsize,
    capabilities: Vec<String>,
}

impl MockTransport {
    pub fn new(backend_id: &str, fallback: Reply) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
            capability_calls: AtomicUsize::new(0),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, names: &[&str]) -> Self {
        self.capabilities = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock() = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn capability_calls(&self) -> usize {
        self.capability_calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Reply {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }

    fn answer(&self, reply: Reply) -> AppResult<Value> {
        match reply {
            Reply::Data(value) | Reply::Slow(_, value) => Ok(value),
            Reply::Declined(message) => Err(AppError::Backend {
                backend_id: self.backend_id.clone(),
                message,
            }),
            Reply::Fail(failure) => Err(AppError::Transport {
                backend_id: self.backend_id.clone(),
                failure,
                message: "scripted failure".to_string(),
            }),
        }
    }
}

#[async_trait]
impl BackendTransport for MockTransport {
    async fn execute(&self, _operation: &str, _parameters: &Value) -> AppResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply();
        if let Reply::Slow(delay, _) = &reply {
            tokio::time::sleep(*delay).await;
        }
        self.answer(reply)
    }

    async fn capabilities(&self) -> AppResult<Vec<String>> {
        self.capability_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_reply() {
            Reply::Fail(failure) => Err(AppError::Transport {
                backend_id: self.backend_id.clone(),
                failure,
                message: "scripted failure".to_string(),
            }),
            _ => Ok(self.capabilities.clone()),
        }
    }
}

/// Factory handing out pre-registered mock transports by backend id
#[derive(Default)]
pub struct MockFactory {
    transports: Mutex<HashMap<String, Arc<MockTransport>>>,
    builds: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, transport: MockTransport) -> Arc<MockTransport> {
        let transport = Arc::new(transport);
        self.transports
            .lock()
            .insert(transport.backend_id.clone(), Arc::clone(&transport));
        transport
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn transport(&self, backend_id: &str) -> Option<Arc<MockTransport>> {
        self.transports.lock().get(backend_id).cloned()
    }
}

impl TransportFactory for MockFactory {
    fn build(&self, backend: &BackendDescriptor) -> AppResult<Arc<dyn BackendTransport>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let transport = self
            .transports
            .lock()
            .get(&backend.id)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("no mock for {}", backend.id)))?;
        Ok(transport as Arc<dyn BackendTransport>)
    }
}

/// Minimal descriptor for pool and router tests
pub fn descriptor(id: &str) -> BackendDescriptor {
    BackendDescriptor {
        id: id.to_string(),
        display_name: id.to_string(),
        category: "general".to_string(),
        description: String::new(),
        base_address: format!("http://{}.invalid", id),
        timeout_ms: 1000,
        headers: Default::default(),
        operations: Vec::new(),
    }
}
