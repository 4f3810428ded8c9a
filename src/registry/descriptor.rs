//! Backend and operation descriptors
//!
//! Descriptors are parsed from the registry document, validated once at load
//! time and then shared immutably behind `Arc`.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Operation name prefixes treated as read-like when the registry document
/// does not declare idempotence explicitly
const IDEMPOTENT_PREFIXES: &[&str] = &[
    "read_", "get_", "list_", "search", "find", "fetch", "query", "describe", "status",
];

/// Default idempotence for an operation that does not declare it
pub fn is_idempotent_by_name(operation: &str) -> bool {
    let name = operation.to_ascii_lowercase();
    IDEMPOTENT_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// JSON type accepted by a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
            ParamKind::Any => "any",
        }
    }

    /// Whether `value` is acceptable for this kind
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
            ParamKind::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// One named action a backend exposes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    /// Safe to cache and replay
    pub idempotent: bool,
}

impl OperationDescriptor {
    /// Check call parameters against the operation schema
    ///
    /// Required parameters must be present and non-null, and every declared
    /// parameter that is present must match its kind. Undeclared parameters
    /// pass through to the backend.
    pub fn validate_parameters(&self, parameters: &Map<String, Value>) -> AppResult<()> {
        for spec in &self.parameters {
            match parameters.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(AppError::Validation(format!(
                        "operation '{}' requires parameter '{}'",
                        self.name, spec.name
                    )));
                }
                Some(value) if !value.is_null() && !spec.kind.accepts(value) => {
                    return Err(AppError::Validation(format!(
                        "parameter '{}' of operation '{}' must be of type {}",
                        spec.name,
                        self.name,
                        spec.kind.as_str()
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }
}

/// A registered backend service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendDescriptor {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub description: String,
    pub base_address: String,
    pub timeout_ms: u64,
    pub headers: BTreeMap<String, String>,
    pub operations: Vec<OperationDescriptor>,
}

impl BackendDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Case-insensitive match over display name, description and category
    ///
    /// `needle` must already be lowercase.
    pub(crate) fn matches_keyword(&self, needle: &str) -> bool {
        self.display_name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
            || self.category.to_lowercase().contains(needle)
    }

    /// Operations whose name or description contain `needle` (lowercase)
    pub(crate) fn matching_operations(&self, needle: &str) -> Vec<OperationDescriptor> {
        self.operations
            .iter()
            .filter(|op| op.matches(needle))
            .cloned()
            .collect()
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    backends: Vec<RawBackend>,
}

#[derive(Debug, Deserialize)]
struct RawBackend {
    id: String,
    name: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    description: String,
    base_address: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    operations: Vec<RawOperation>,
}

#[derive(Debug, Deserialize)]
struct RawOperation {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    idempotent: Option<bool>,
    #[serde(default)]
    parameters: Vec<ParameterSpec>,
}

impl From<RawOperation> for OperationDescriptor {
    fn from(raw: RawOperation) -> Self {
        let idempotent = raw
            .idempotent
            .unwrap_or_else(|| is_idempotent_by_name(&raw.name));
        Self {
            name: raw.name,
            description: raw.description,
            parameters: raw.parameters,
            idempotent,
        }
    }
}

impl From<RawBackend> for BackendDescriptor {
    fn from(raw: RawBackend) -> Self {
        Self {
            id: raw.id,
            display_name: raw.name,
            category: raw.category,
            description: raw.description,
            base_address: raw.base_address.trim_end_matches('/').to_string(),
            timeout_ms: raw.timeout_ms,
            headers: raw.headers,
            operations: raw.operations.into_iter().map(Into::into).collect(),
        }
    }
}

/// Parse and validate a registry document
///
/// # Errors
///
/// Returns `RegistryMalformed` if the JSON does not parse or any backend
/// fails structural validation. No partial result is ever returned.
pub fn parse_document(text: &str) -> AppResult<Vec<BackendDescriptor>> {
    let document: RegistryDocument = serde_json::from_str(text)
        .map_err(|e| AppError::RegistryMalformed(format!("invalid JSON: {}", e)))?;

    let backends: Vec<BackendDescriptor> =
        document.backends.into_iter().map(Into::into).collect();

    let mut seen_ids = HashSet::new();
    for backend in &backends {
        validate_backend(backend)?;
        if !seen_ids.insert(backend.id.as_str()) {
            return Err(AppError::RegistryMalformed(format!(
                "duplicate backend id '{}'",
                backend.id
            )));
        }
    }

    Ok(backends)
}

fn validate_backend(backend: &BackendDescriptor) -> AppResult<()> {
    if backend.id.trim().is_empty() {
        return Err(AppError::RegistryMalformed(
            "backend id cannot be empty".to_string(),
        ));
    }

    if !backend.base_address.starts_with("http://") && !backend.base_address.starts_with("https://")
    {
        return Err(AppError::RegistryMalformed(format!(
            "backend '{}' base_address must start with 'http://' or 'https://', got '{}'",
            backend.id, backend.base_address
        )));
    }

    if backend.timeout_ms == 0 {
        return Err(AppError::RegistryMalformed(format!(
            "backend '{}' timeout_ms must be greater than 0",
            backend.id
        )));
    }

    let mut operation_names = HashSet::new();
    for operation in &backend.operations {
        if operation.name.trim().is_empty() {
            return Err(AppError::RegistryMalformed(format!(
                "backend '{}' has an operation with an empty name",
                backend.id
            )));
        }
        if !operation_names.insert(operation.name.as_str()) {
            return Err(AppError::RegistryMalformed(format!(
                "backend '{}' declares operation '{}' more than once",
                backend.id, operation.name
            )));
        }

        let mut parameter_names = HashSet::new();
        for parameter in &operation.parameters {
            if !parameter_names.insert(parameter.name.as_str()) {
                return Err(AppError::RegistryMalformed(format!(
                    "operation '{}' on backend '{}' declares parameter '{}' more than once",
                    operation.name, backend.id, parameter.name
                )));
            }
        }
    }

    Ok(())
}
