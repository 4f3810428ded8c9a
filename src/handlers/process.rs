//! Request processing endpoint
//!
//! `POST /v1/process` accepts either a free-text instruction or a structured
//! call and answers with the orchestrator's result envelope.

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::orchestrator::{CallRequest, Request, RequestContext, ResultEnvelope};
use axum::{Extension, Json, extract::State, http::StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Body of `POST /v1/process`
///
/// Exactly one of `text` and `operation` must be present.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessBody {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub backend_id: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
    /// Per-request deadline; capped by the server's request timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ProcessBody {
    pub fn into_request(self) -> AppResult<Request> {
        match (self.text, self.operation) {
            (Some(_), Some(_)) => Err(AppError::Validation(
                "'text' and 'operation' are mutually exclusive".to_string(),
            )),
            (None, None) => Err(AppError::Validation(
                "one of 'text' or 'operation' is required".to_string(),
            )),
            (Some(text), None) => {
                if self.backend_id.is_some() || self.parameters.is_some() {
                    return Err(AppError::Validation(
                        "'backend_id' and 'parameters' require 'operation'".to_string(),
                    ));
                }
                if text.trim().is_empty() {
                    return Err(AppError::Validation("'text' cannot be empty".to_string()));
                }
                Ok(Request::Text(text))
            }
            (None, Some(operation)) => {
                if operation.trim().is_empty() {
                    return Err(AppError::Validation(
                        "'operation' cannot be empty".to_string(),
                    ));
                }
                Ok(Request::Call(CallRequest {
                    backend_id: self.backend_id,
                    operation,
                    parameters: self.parameters.unwrap_or_default(),
                }))
            }
        }
    }
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<ProcessBody>,
) -> Result<(StatusCode, Json<ResultEnvelope>), AppError> {
    let server_timeout = Duration::from_secs(state.config().server.request_timeout_seconds);
    let timeout = match body.timeout_ms {
        Some(0) => {
            return Err(AppError::Validation(
                "'timeout_ms' must be greater than 0".to_string(),
            ));
        }
        Some(ms) => Duration::from_millis(ms).min(server_timeout),
        None => server_timeout,
    };
    let request = body.into_request()?;

    tracing::debug!(
        request_id = %request_id,
        kind = match &request {
            Request::Text(_) => "text",
            Request::Call(_) => "call",
        },
        timeout_ms = timeout.as_millis() as u64,
        "Received process request"
    );

    let ctx = RequestContext::new()
        .with_request_id(request_id.to_string())
        .with_timeout(timeout);
    let envelope = state.orchestrator().process(request, ctx).await;

    let status = envelope
        .error
        .as_ref()
        .map_or(StatusCode::OK, |e| e.kind.http_status());
    Ok((status, Json(envelope)))
}
