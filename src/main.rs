//! toolroute HTTP server
//!
//! Loads the backend registry and serves the routing core over Axum.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use toolroute::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    registry::{self, Registry},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => {
            match output {
                Some(path) => {
                    std::fs::write(&path, generate_config_template())?;
                    println!("Wrote configuration template to {}", path);
                }
                None => print!("{}", generate_config_template()),
            }
            return Ok(());
        }
        Some(Command::Check) => {
            let config = Config::from_file(&cli.config)?;
            let source = registry::source::from_config(&config.registry)?;
            let registry = Registry::from_source(source).await?;
            let info = registry.info();
            println!(
                "Configuration OK: {} backends, {} operations from {}",
                info.backend_count, info.operation_count, info.source
            );
            return Ok(());
        }
        None => {}
    }

    // Load configuration
    let config = Arc::new(Config::from_file(&cli.config)?);

    // Initialize telemetry
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        config_path = %cli.config,
        "Starting toolroute server on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::from_config(Arc::clone(&config)).await?;
    let info = state.orchestrator().registry().info();
    tracing::info!(
        version = info.version,
        backends = info.backend_count,
        operations = info.operation_count,
        "Backend registry ready"
    );

    let reports = state.orchestrator().warm_up().await;
    for report in reports.iter().filter(|r| r.error.is_some()) {
        tracing::warn!(
            backend_id = %report.backend_id,
            error = ?report.error,
            "Backend did not answer the capability query; it will be routed to anyway"
        );
    }

    state.orchestrator().spawn_background_tasks(&config);

    // Create socket address
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, handlers::app(state)).await?;

    Ok(())
}
