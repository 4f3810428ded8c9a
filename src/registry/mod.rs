//! Backend registry
//!
//! Loads backend descriptors from a [`RegistrySource`] and serves lookups
//! from an immutable index. Refresh builds a complete new index and swaps it
//! in atomically; readers never see a partially updated registry, and a
//! failed refresh leaves the previous index in place.

pub mod descriptor;
pub mod source;

pub use descriptor::{BackendDescriptor, OperationDescriptor, ParamKind, ParameterSpec};
pub use source::{FileSource, HttpSource, RegistrySource, StaticSource};

use crate::error::AppResult;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Backends whose operations matched a [`Registry::find_operations`] query
#[derive(Debug, Clone)]
pub struct OperationMatch {
    pub backend: Arc<BackendDescriptor>,
    pub operations: Vec<OperationDescriptor>,
}

/// Immutable snapshot of the registry
#[derive(Debug)]
pub struct RegistryIndex {
    backends: Vec<Arc<BackendDescriptor>>,
    by_id: HashMap<String, usize>,
    by_operation: HashMap<String, Vec<usize>>,
    version: u64,
    loaded_at: SystemTime,
}

impl RegistryIndex {
    fn build(backends: Vec<BackendDescriptor>, version: u64) -> Self {
        let backends: Vec<Arc<BackendDescriptor>> = backends.into_iter().map(Arc::new).collect();

        let mut by_id = HashMap::with_capacity(backends.len());
        let mut by_operation: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, backend) in backends.iter().enumerate() {
            by_id.insert(backend.id.clone(), position);
            for operation in &backend.operations {
                by_operation
                    .entry(operation.name.clone())
                    .or_default()
                    .push(position);
            }
        }

        Self {
            backends,
            by_id,
            by_operation,
            version,
            loaded_at: SystemTime::now(),
        }
    }

    fn empty() -> Self {
        Self::build(Vec::new(), 0)
    }

    pub fn backends(&self) -> &[Arc<BackendDescriptor>] {
        &self.backends
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }
}

/// Summary of the active index, for reporting
#[derive(Debug, Clone, Serialize)]
pub struct RegistryInfo {
    pub version: u64,
    pub backend_count: usize,
    pub operation_count: usize,
    pub source: String,
}

pub struct Registry {
    source: Arc<dyn RegistrySource>,
    index: ArcSwap<RegistryIndex>,
    next_version: AtomicU64,
}

impl Registry {
    /// Create a registry with an empty index
    ///
    /// Nothing is fetched until [`Registry::load`] is called.
    pub fn new(source: Arc<dyn RegistrySource>) -> Self {
        Self {
            source,
            index: ArcSwap::from_pointee(RegistryIndex::empty()),
            next_version: AtomicU64::new(1),
        }
    }

    /// Create a registry and perform the initial load
    pub async fn from_source(source: Arc<dyn RegistrySource>) -> AppResult<Self> {
        let registry = Self::new(source);
        registry.load().await?;
        Ok(registry)
    }

    /// Fetch, parse and validate the source document, then swap it in
    ///
    /// Returns the version of the new index.
    ///
    /// # Errors
    ///
    /// `RegistryUnavailable` when the source cannot be read and
    /// `RegistryMalformed` when the document is invalid. The previous index
    /// stays active in both cases.
    pub async fn load(&self) -> AppResult<u64> {
        let text = self.source.fetch().await?;
        let backends = descriptor::parse_document(&text)?;

        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let backend_count = backends.len();
        self.index
            .store(Arc::new(RegistryIndex::build(backends, version)));

        tracing::info!(
            source = %self.source.describe(),
            version,
            backend_count,
            "Registry loaded"
        );
        Ok(version)
    }

    /// Reload from the source and atomically replace the index
    pub async fn refresh(&self) -> AppResult<u64> {
        self.load().await.inspect_err(|e| {
            tracing::warn!(
                source = %self.source.describe(),
                error = %e,
                active_version = self.version(),
                "Registry refresh failed, keeping previous index"
            );
        })
    }

    /// Current index snapshot
    pub fn snapshot(&self) -> Arc<RegistryIndex> {
        self.index.load_full()
    }

    pub fn version(&self) -> u64 {
        self.index.load().version
    }

    pub fn info(&self) -> RegistryInfo {
        let index = self.index.load();
        RegistryInfo {
            version: index.version,
            backend_count: index.backends.len(),
            operation_count: index.backends.iter().map(|b| b.operations.len()).sum(),
            source: self.source.describe(),
        }
    }

    pub fn all(&self) -> Vec<Arc<BackendDescriptor>> {
        self.index.load().backends.clone()
    }

    pub fn find_by_id(&self, id: &str) -> Option<Arc<BackendDescriptor>> {
        let index = self.index.load();
        index
            .by_id
            .get(id)
            .map(|&position| Arc::clone(&index.backends[position]))
    }

    pub fn find_by_category(&self, category: &str) -> Vec<Arc<BackendDescriptor>> {
        self.index
            .load()
            .backends
            .iter()
            .filter(|b| b.category.eq_ignore_ascii_case(category))
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search over name, description and category
    pub fn search(&self, keyword: &str) -> Vec<Arc<BackendDescriptor>> {
        let needle = keyword.to_lowercase();
        self.index
            .load()
            .backends
            .iter()
            .filter(|b| b.matches_keyword(&needle))
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search over operation names and descriptions
    ///
    /// Results are grouped per backend in source order; backends without a
    /// matching operation are omitted.
    pub fn find_operations(&self, query: &str) -> Vec<OperationMatch> {
        let needle = query.to_lowercase();
        self.index
            .load()
            .backends
            .iter()
            .filter_map(|backend| {
                let operations = backend.matching_operations(&needle);
                (!operations.is_empty()).then(|| OperationMatch {
                    backend: Arc::clone(backend),
                    operations,
                })
            })
            .collect()
    }

    /// Backends exposing an operation with exactly this name, in source order
    pub fn find_by_operation(&self, operation: &str) -> Vec<Arc<BackendDescriptor>> {
        let index = self.index.load();
        index
            .by_operation
            .get(operation)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&p| Arc::clone(&index.backends[p]))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn operation(&self, backend_id: &str, operation: &str) -> Option<OperationDescriptor> {
        self.find_by_id(backend_id)
            .and_then(|backend| backend.operation(operation).cloned())
    }

    /// Start periodic refresh from the source
    ///
    /// Refresh failures are logged and the previous index kept. A monitor
    /// task logs if the refresh loop ever stops.
    pub fn start_background_refresh(self: Arc<Self>, interval: Duration) {
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                "Starting background registry refresh"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                tracing::debug!("Running scheduled registry refresh");
                let _ = self.refresh().await;
            }
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(_) => tracing::error!(
                    "Background registry refresh task terminated unexpectedly. \
                    The registry will not pick up source changes until restart."
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    "Background registry refresh task panicked. \
                    The registry will not pick up source changes until restart."
                ),
            }
        });
    }
}
