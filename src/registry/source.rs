//! Registry sources
//!
//! A source only fetches the raw document; parsing and validation happen in
//! the registry so every source fails the same way on bad content.

use crate::config::RegistryConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where a registry document comes from
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Human-readable location used in errors and logs
    fn describe(&self) -> String;

    /// Fetch the raw document text
    ///
    /// # Errors
    ///
    /// Returns `RegistryUnavailable` when the document cannot be read.
    async fn fetch(&self) -> AppResult<String>;
}

/// Registry document on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegistrySource for FileSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn fetch(&self) -> AppResult<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| AppError::RegistryUnavailable {
                source_name: self.describe(),
                reason: e.to_string(),
            })
    }
}

/// Registry document served over HTTP
#[derive(Debug, Clone)]
pub struct HttpSource {
    url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl RegistrySource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> AppResult<String> {
        let unavailable = |reason: String| AppError::RegistryUnavailable {
            source_name: self.url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {}", status)));
        }

        response.text().await.map_err(|e| unavailable(e.to_string()))
    }
}

/// In-memory registry document
///
/// Used for embedding and tests; the document can be replaced to simulate a
/// changing upstream.
#[derive(Debug, Default)]
pub struct StaticSource {
    document: parking_lot::RwLock<String>,
}

impl StaticSource {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: parking_lot::RwLock::new(document.into()),
        }
    }

    pub fn replace(&self, document: impl Into<String>) {
        *self.document.write() = document.into();
    }
}

#[async_trait]
impl RegistrySource for StaticSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    async fn fetch(&self) -> AppResult<String> {
        Ok(self.document.read().clone())
    }
}

/// Build the source named by the `[registry]` configuration section
pub fn from_config(config: &RegistryConfig) -> AppResult<Arc<dyn RegistrySource>> {
    match (&config.path, &config.url) {
        (Some(path), None) => Ok(Arc::new(FileSource::new(path))),
        (None, Some(url)) => Ok(Arc::new(HttpSource::new(url)?)),
        _ => Err(AppError::Config(
            "exactly one of registry.path or registry.url must be set".to_string(),
        )),
    }
}
