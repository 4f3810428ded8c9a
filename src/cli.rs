//! Command-line interface for toolroute
//!
//! Provides argument parsing and subcommand handling for the toolroute binary.

use clap::{Parser, Subcommand};

/// Request routing and resilience core for tool backends
#[derive(Parser)]
#[command(name = "toolroute")]
#[command(version)]
#[command(about = "Request routing and resilience core for tool backends")]
#[command(
    long_about = "toolroute turns free-text or structured requests into calls on registered \
    tool backends, choosing a healthy backend, retrying transient failures, \
    caching idempotent results and tripping circuit breakers on failing backends."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate the configuration and load the backend registry once
    Check,
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# toolroute Configuration
# ========================
#
# This file configures the HTTP host, the backend registry source and the
# resilience settings (pool, circuit breaker, retry, cache).

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 3000

# Default deadline for one request in seconds (1-300).
# Clients may send a shorter "timeout_ms" per request.
request_timeout_seconds = 30

# ─────────────────────────────────────────────────────────────────────────────
# BACKEND REGISTRY
# ─────────────────────────────────────────────────────────────────────────────
#
# Exactly one of `path` (local JSON file) or `url` (HTTP endpoint returning the
# same JSON document) must be set.

[registry]
path = "backends.json"
# url = "http://registry.internal:8080/backends"

# Re-read the registry every N seconds (0 disables periodic refresh).
# A malformed document never replaces the last good registry.
refresh_interval_seconds = 300

# ─────────────────────────────────────────────────────────────────────────────
# CONNECTION POOL
# ─────────────────────────────────────────────────────────────────────────────

[pool]
# Handles unused for this long are closed by the idle sweep
idle_timeout_seconds = 300

# How often the idle sweep runs (0 disables it)
sweep_interval_seconds = 60

# Maximum concurrent calls per backend (omit for no limit)
# max_in_flight_per_backend = 32

# ─────────────────────────────────────────────────────────────────────────────
# CIRCUIT BREAKER
# ─────────────────────────────────────────────────────────────────────────────

[circuit_breaker]
# Consecutive transport failures before a backend's circuit opens
failure_threshold = 5

# Time an open circuit waits before admitting a single trial call
reset_timeout_ms = 30000

# How often open circuits are actively probed (0 disables probing)
probe_interval_seconds = 10

# ─────────────────────────────────────────────────────────────────────────────
# ROUTING
# ─────────────────────────────────────────────────────────────────────────────

[routing]
# Backend selection strategy:
#   - "round_robin": rotate through eligible backends
#   - "least_connections": fewest in-flight calls
#   - "weighted_response_time": lowest moving-average latency
#   - "health_based": skip unhealthy connections, then round robin
strategy = "round_robin"

# Smoothing factor for the latency moving average, in (0, 1]
latency_ema_alpha = 0.3

# ─────────────────────────────────────────────────────────────────────────────
# RESULT CACHE
# ─────────────────────────────────────────────────────────────────────────────
#
# Only idempotent operations are cached.

[cache]
enabled = true

# Entries held in the in-memory primary tier
primary_capacity = 100

default_ttl_seconds = 300

# Byte-bounded secondary tier receiving entries evicted from the primary tier
secondary_enabled = false
secondary_max_bytes = 16777216

# Secondary entries larger than this are gzip-compressed
compression_threshold_bytes = 4096

# How often expired entries are purged (0 disables the sweep)
sweep_interval_seconds = 30

# ─────────────────────────────────────────────────────────────────────────────
# RETRY
# ─────────────────────────────────────────────────────────────────────────────

[retry]
# Total attempts per call, including the first
max_attempts = 3

# Backoff before retry n is base * 2^(n-1) plus up to `base` of jitter
base_delay_ms = 100
max_delay_ms = 30000

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# Outcome records buffered for the stats collector; overflow is dropped
outcome_channel_capacity = 1024

# Recent outcomes kept for /v1/stats
history_limit = 1000

# Prometheus metrics are always available at /metrics on the server port
"#
}
