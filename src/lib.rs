//! toolroute - Request routing and resilience core for tool backends
//!
//! Turns free-text instructions or structured calls into operations on
//! registered backends. Each request is resolved against a hot-swappable
//! registry, routed to a healthy backend, guarded by per-backend circuit
//! breakers and retried on transient failure. Idempotent results are served
//! from a two-tier cache.

pub mod breaker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observer;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod retry;
pub mod router;
pub mod telemetry;
pub mod translator;
pub mod transport;
