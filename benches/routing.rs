//! Routing performance benchmarks
//!
//! Measures the non-I/O hot path of a request: intent translation, result
//! fingerprinting and backend selection (excludes network calls).
//!
//! ## Expected Performance Characteristics
//!
//! - Translation: Low microseconds (keyword scan plus entity regexes)
//! - Fingerprinting: Sub-microsecond to low microseconds, growing with parameter size
//! - Backend selection: Sub-microsecond per candidate (breaker peek plus strategy)
//!
//! **Note**: Actual measurements vary with compiler version, CPU architecture, and system load.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use toolroute::{
    breaker::CircuitBreaker,
    cache::Fingerprint,
    config::Config,
    pool::ConnectionPool,
    registry::descriptor::parse_document,
    router::{BackendRouter, RoutingStrategy},
    transport::HttpTransportFactory,
    translator,
};

/// Benchmark intent translation over short and long instructions
fn bench_translation(c: &mut Criterion) {
    let inputs = vec![
        ("read_file", "Read the file README.md"),
        (
            "commit",
            "Commit the staged changes with message 'fix flaky retry test'",
        ),
        (
            "search",
            "Search the web for articles about async cancellation in Rust and \
            send a summary to team@example.com with the link https://example.com/notes",
        ),
    ];

    let mut group = c.benchmark_group("translation");

    for (name, text) in inputs {
        group.bench_with_input(BenchmarkId::from_parameter(name), &text, |b, t| {
            b.iter(|| translator::translate(t));
        });
    }

    group.finish();
}

/// Benchmark cache fingerprinting of call parameters
fn bench_fingerprint(c: &mut Criterion) {
    let small = json!({"path": "README.md"});
    let large = json!({
        "query": "circuit breaker half open",
        "filters": {"language": "rust", "stars": {"min": 100}, "topics": ["async", "tokio"]},
        "limit": 50,
        "offset": 0
    });

    let mut group = c.benchmark_group("fingerprint");
    group.bench_function("small", |b| {
        b.iter(|| Fingerprint::new("files-1", "read_file", &small, true));
    });
    group.bench_function("nested", |b| {
        b.iter(|| Fingerprint::new("search-1", "search", &large, true));
    });
    group.finish();
}

/// Benchmark backend selection across strategies
fn bench_selection(c: &mut Criterion) {
    let document = json!({
        "backends": (0..8).map(|i| json!({
            "id": format!("files-{}", i),
            "name": "Files",
            "base_address": format!("http://files-{}.invalid", i),
            "operations": [{"name": "read_file"}]
        })).collect::<Vec<_>>()
    })
    .to_string();
    let candidates: Vec<_> = parse_document(&document)
        .unwrap()
        .into_iter()
        .map(Arc::new)
        .collect();

    let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(30)));
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(HttpTransportFactory),
        Duration::from_secs(300),
        None,
    ));

    let mut group = c.benchmark_group("selection");

    for strategy in [
        RoutingStrategy::RoundRobin,
        RoutingStrategy::LeastConnections,
        RoutingStrategy::WeightedResponseTime,
        RoutingStrategy::HealthBased,
    ] {
        let router = BackendRouter::new(strategy, Arc::clone(&breaker), Arc::clone(&pool), 0.3);
        for (i, backend) in candidates.iter().enumerate() {
            router.record_latency(&backend.id, 10.0 + i as f64);
        }
        group.bench_function(strategy.as_str(), |b| {
            b.iter(|| router.select("read_file", &candidates).unwrap());
        });
    }

    group.finish();
}

/// Benchmark configuration parsing and validation
///
/// Called once during startup.
fn bench_config_parsing(c: &mut Criterion) {
    let toml_str = r#"
[server]
host = "127.0.0.1"
port = 3000

[registry]
path = "backends.json"

[circuit_breaker]
failure_threshold = 5

[routing]
strategy = "weighted_response_time"
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| toml_str.parse::<Config>().unwrap());
    });
}

criterion_group!(
    benches,
    bench_translation,
    bench_fingerprint,
    bench_selection,
    bench_config_parsing,
);
criterion_main!(benches);
