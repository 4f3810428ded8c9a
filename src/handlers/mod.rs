//! HTTP host for the routing core

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::observer::{ChannelSink, InMemoryStateStore, StateStore, spawn_collector};
use crate::orchestrator::Orchestrator;
use crate::registry::{self, Registry};
use crate::transport::HttpTransportFactory;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod backends;
pub mod health;
pub mod metrics;
pub mod process;
pub mod stats;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn StateStore>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            store,
        }
    }

    /// Wire the production components described by `config`
    ///
    /// Loads the registry once, starts the outcome collector and builds the
    /// orchestrator over HTTP transports. Background maintenance tasks are
    /// not started; see [`Orchestrator::spawn_background_tasks`].
    ///
    /// # Errors
    ///
    /// Fails if the registry cannot be loaded or metrics cannot be registered.
    pub async fn from_config(config: Arc<Config>) -> AppResult<Self> {
        let metrics = Arc::new(
            Metrics::new()
                .map_err(|e| AppError::Internal(format!("metrics registration failed: {}", e)))?,
        );

        let source = registry::source::from_config(&config.registry)?;
        let registry = Arc::new(Registry::from_source(source).await?);

        let (sink, receiver) =
            ChannelSink::new(config.observability.outcome_channel_capacity, Arc::clone(&metrics));
        let store: Arc<dyn StateStore> =
            Arc::new(InMemoryStateStore::new(config.observability.history_limit));
        spawn_collector(receiver, Arc::clone(&store));

        let orchestrator = Orchestrator::new(
            &config,
            registry,
            Arc::new(HttpTransportFactory),
            metrics,
            Arc::new(sink),
        )?;

        Ok(Self::new(config, Arc::new(orchestrator), store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        self.orchestrator.metrics()
    }
}

/// Build the HTTP router with request-id and trace layers
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/v1/process", post(process::handler))
        .route("/v1/backends", get(backends::list))
        .route("/v1/registry/refresh", post(backends::refresh))
        .route("/v1/stats", get(stats::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .with_state(state)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}
