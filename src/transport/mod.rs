//! Backend transport seam
//!
//! The pool owns one transport per backend and many logical calls share it;
//! multiplexing is the transport's concern.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::{HttpTransport, HttpTransportFactory};

use crate::error::AppResult;
use crate::registry::BackendDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Request/response channel to one backend service
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Execute an operation
    ///
    /// # Errors
    ///
    /// `AppError::Backend` for a well-formed failure response and
    /// `AppError::Transport` when no usable response arrived.
    async fn execute(&self, operation: &str, parameters: &Value) -> AppResult<Value>;

    /// Names of the operations the backend advertises
    async fn capabilities(&self) -> AppResult<Vec<String>>;
}

/// Builds transports for backend descriptors
///
/// The factory applies per-backend settings (timeout, headers).
pub trait TransportFactory: Send + Sync {
    fn build(&self, backend: &BackendDescriptor) -> AppResult<Arc<dyn BackendTransport>>;
}
