//! Error types for toolroute
//!
//! Every failure in the routing core is an [`AppError`]. The orchestrator folds
//! them into result envelopes; the HTTP host renders them via `IntoResponse`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level failure classes reported by a backend transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailure {
    /// The call did not complete within the backend timeout
    Timeout,
    /// Connection could not be established or was reset
    Connect,
    /// Backend answered with a non-success HTTP status
    Status(u16),
    /// Backend answered with a body that could not be decoded
    Decode,
}

impl TransportFailure {
    /// Whether a retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect => true,
            Self::Status(code) => *code >= 500 || *code == 429,
            Self::Decode => false,
        }
    }

    /// Whether the handle that produced this failure is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connect)
    }
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read configuration file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Registry source {source_name} unavailable: {reason}")]
    RegistryUnavailable { source_name: String, reason: String },

    #[error("Registry document is malformed: {0}")]
    RegistryMalformed(String),

    #[error("No matching operation: {0}")]
    NoMatchingOperation(String),

    #[error("No healthy backend for operation '{operation}' ({candidates} candidates considered)")]
    NoHealthyBackend {
        operation: String,
        candidates: usize,
    },

    #[error("Circuit open for backend {backend_id}")]
    CircuitOpen { backend_id: String },

    #[error("Connection pool exhausted for backend {backend_id} (limit {limit})")]
    PoolExhausted { backend_id: String, limit: usize },

    #[error("Call to {backend_id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        backend_id: String,
        attempts: usize,
        last_error: Box<AppError>,
    },

    #[error("Backend {backend_id} reported failure: {message}")]
    Backend { backend_id: String, message: String },

    #[error("Transport error calling {backend_id} ({failure:?}): {message}")]
    Transport {
        backend_id: String,
        failure: TransportFailure,
        message: String,
    },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable discriminant of [`AppError`], carried in result envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    RegistryUnavailable,
    RegistryMalformed,
    NoMatchingOperation,
    NoHealthyBackend,
    CircuitOpen,
    PoolExhausted,
    RetriesExhausted,
    BackendError,
    Transport,
    Validation,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::RegistryUnavailable => "registry_unavailable",
            Self::RegistryMalformed => "registry_malformed",
            Self::NoMatchingOperation => "no_matching_operation",
            Self::NoHealthyBackend => "no_healthy_backend",
            Self::CircuitOpen => "circuit_open",
            Self::PoolExhausted => "pool_exhausted",
            Self::RetriesExhausted => "retries_exhausted",
            Self::BackendError => "backend_error",
            Self::Transport => "transport",
            Self::Validation => "validation",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// HTTP status the host answers with for this kind of failure
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::NoMatchingOperation => StatusCode::NOT_FOUND,
            Self::NoHealthyBackend
            | Self::CircuitOpen
            | Self::PoolExhausted
            | Self::RegistryUnavailable
            | Self::RegistryMalformed => StatusCode::SERVICE_UNAVAILABLE,
            Self::RetriesExhausted | Self::BackendError | Self::Transport => {
                StatusCode::BAD_GATEWAY
            }
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::Config | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AppError {
    /// Error kind for envelopes and metrics labels
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => ErrorKind::Config,
            Self::RegistryUnavailable { .. } => ErrorKind::RegistryUnavailable,
            Self::RegistryMalformed(_) => ErrorKind::RegistryMalformed,
            Self::NoMatchingOperation(_) => ErrorKind::NoMatchingOperation,
            Self::NoHealthyBackend { .. } => ErrorKind::NoHealthyBackend,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::Backend { .. } => ErrorKind::BackendError,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Backend the error is attributed to, if any
    pub fn backend_id(&self) -> Option<&str> {
        match self {
            Self::CircuitOpen { backend_id }
            | Self::PoolExhausted { backend_id, .. }
            | Self::RetriesExhausted { backend_id, .. }
            | Self::Backend { backend_id, .. }
            | Self::Transport { backend_id, .. } => Some(backend_id),
            _ => None,
        }
    }

    /// Whether the retry executor may spend another attempt on this error
    ///
    /// Only transient transport failures qualify. Backend-declared failures,
    /// validation problems, open circuits and cancellation are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { failure, .. } => failure.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error counts against the backend's circuit
    ///
    /// A backend that answered with a well-formed failure or a client-error
    /// status is alive; only transport-level breakage counts.
    pub fn counts_as_backend_failure(&self) -> bool {
        match self {
            Self::Transport { failure, .. } => match failure {
                TransportFailure::Status(code) => *code >= 500,
                _ => true,
            },
            _ => false,
        }
    }

    /// Whether the pooled handle that produced this error must be discarded
    pub fn is_fatal_to_handle(&self) -> bool {
        matches!(self, Self::Transport { failure, .. } if failure.is_fatal())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.kind().http_status();

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
