//! HTTP/JSON backend transport
//!
//! - `POST {base}/execute` with `{"operation", "parameters"}` answers
//!   `{"success", "data", "error"}`
//! - `GET {base}/capabilities` answers `{"operations": [{"name": ...}]}`

use super::{BackendTransport, TransportFactory};
use crate::error::{AppError, AppResult, TransportFailure};
use crate::registry::BackendDescriptor;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    operation: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CapabilitiesResponse {
    operations: Vec<AdvertisedOperation>,
}

#[derive(Debug, Deserialize)]
struct AdvertisedOperation {
    name: String,
}

/// Transport speaking JSON over HTTP to one backend
#[derive(Debug, Clone)]
pub struct HttpTransport {
    backend_id: String,
    base_address: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client with the backend's timeout and default headers
    pub fn new(backend: &BackendDescriptor) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &backend.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                AppError::Validation(format!(
                    "backend '{}' header name '{}' is invalid: {}",
                    backend.id, name, e
                ))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                AppError::Validation(format!(
                    "backend '{}' header '{}' has an invalid value: {}",
                    backend.id, name, e
                ))
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(backend.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            backend_id: backend.id.clone(),
            base_address: backend.base_address.clone(),
            client,
        })
    }

    fn transport_error(&self, failure: TransportFailure, message: impl Into<String>) -> AppError {
        AppError::Transport {
            backend_id: self.backend_id.clone(),
            failure,
            message: message.into(),
        }
    }

    fn classify(&self, error: reqwest::Error) -> AppError {
        let failure = if error.is_timeout() {
            TransportFailure::Timeout
        } else if error.is_decode() {
            TransportFailure::Decode
        } else if let Some(status) = error.status() {
            TransportFailure::Status(status.as_u16())
        } else {
            TransportFailure::Connect
        };
        self.transport_error(failure, error.to_string())
    }

    async fn checked(&self, response: reqwest::Response) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.transport_error(
            TransportFailure::Status(status.as_u16()),
            format!("HTTP {}: {}", status, body),
        ))
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn execute(&self, operation: &str, parameters: &Value) -> AppResult<Value> {
        let url = format!("{}/execute", self.base_address);
        tracing::debug!(
            backend_id = %self.backend_id,
            operation = %operation,
            "Executing backend operation"
        );

        let response = self
            .client
            .post(&url)
            .json(&ExecuteRequest {
                operation,
                parameters,
            })
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let body: ExecuteResponse = self
            .checked(response)
            .await?
            .json()
            .await
            .map_err(|e| self.transport_error(TransportFailure::Decode, e.to_string()))?;

        if body.success {
            Ok(body.data)
        } else {
            Err(AppError::Backend {
                backend_id: self.backend_id.clone(),
                message: body
                    .error
                    .unwrap_or_else(|| "backend reported failure without a message".to_string()),
            })
        }
    }

    async fn capabilities(&self) -> AppResult<Vec<String>> {
        let url = format!("{}/capabilities", self.base_address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let body: CapabilitiesResponse = self
            .checked(response)
            .await?
            .json()
            .await
            .map_err(|e| self.transport_error(TransportFailure::Decode, e.to_string()))?;

        Ok(body.operations.into_iter().map(|op| op.name).collect())
    }
}

/// Default factory producing [`HttpTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn build(&self, backend: &BackendDescriptor) -> AppResult<Arc<dyn BackendTransport>> {
        Ok(Arc::new(HttpTransport::new(backend)?))
    }
}
