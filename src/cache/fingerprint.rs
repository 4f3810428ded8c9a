//! Call fingerprints
//!
//! A fingerprint is the SHA-256 of the canonical JSON encoding of
//! `[backend_id, operation, parameters]`, where canonical means object keys
//! sorted at every depth. Equal calls hash equally regardless of the key
//! order the caller used.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: String,
    cacheable: bool,
}

impl Fingerprint {
    /// Fingerprint a call; `idempotent` comes from the operation descriptor
    pub fn new(backend_id: &str, operation: &str, parameters: &Value, idempotent: bool) -> Self {
        let mut canonical = String::new();
        write_canonical(
            &Value::Array(vec![
                Value::String(backend_id.to_string()),
                Value::String(operation.to_string()),
                parameters.clone(),
            ]),
            &mut canonical,
        );

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self {
            digest: format!("{:x}", hasher.finalize()),
            cacheable: idempotent,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.digest
    }

    /// Only idempotent operations may be cached
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String(key.clone()), out);
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars use serde_json's own encoding
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}
