//! Integration tests for CLI config command
//!
//! Tests file I/O operations for the `toolroute config` subcommand.
//! Verifies template generation, file writing, and argument parsing.

use clap::Parser;
use std::fs;
use tempfile::TempDir;
use toolroute::cli::{Cli, Command, generate_config_template};
use toolroute::config::Config;
use toolroute::router::RoutingStrategy;

/// Helper to create temporary directory for file operations
fn create_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

// ─────────────────────────────────────────────────────────────────────────────
// Template Content Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_generated_template_creates_valid_config_file() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("config.toml");

    let template = generate_config_template();
    fs::write(&config_path, template).expect("Failed to write template");

    let config =
        Config::from_file(&config_path).expect("Generated template should load as valid Config");

    assert_eq!(config.registry.path.as_deref(), Some("backends.json"));
    assert!(config.registry.url.is_none());
    assert_eq!(config.routing.strategy, RoutingStrategy::RoundRobin);
}

#[test]
fn test_template_has_all_sections() {
    let template = generate_config_template();

    for section in [
        "[server]",
        "[registry]",
        "[pool]",
        "[circuit_breaker]",
        "[routing]",
        "[cache]",
        "[retry]",
        "[observability]",
    ] {
        assert!(template.contains(section), "Missing {}", section);
    }
}

#[test]
fn test_template_roundtrip_preserves_config() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("config.toml");

    fs::write(&config_path, generate_config_template()).expect("Failed to write template");
    let config = Config::from_file(&config_path).expect("Failed to load config");

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.request_timeout_seconds, 30);
    assert_eq!(config.observability.log_level, "info");
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument Parsing Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_no_subcommand_runs_server_with_default_config() {
    let cli = Cli::try_parse_from(["toolroute"]).unwrap();
    assert!(cli.command.is_none());
    assert_eq!(cli.config, "config.toml");
}

#[test]
fn test_config_subcommand_with_output() {
    let cli = Cli::try_parse_from(["toolroute", "config", "--output", "out.toml"]).unwrap();
    match cli.command {
        Some(Command::Config { output }) => assert_eq!(output.as_deref(), Some("out.toml")),
        _ => panic!("expected config subcommand"),
    }
}

#[test]
fn test_global_config_flag_applies_to_check() {
    let cli = Cli::try_parse_from(["toolroute", "check", "--config", "prod.toml"]).unwrap();
    assert!(matches!(cli.command, Some(Command::Check)));
    assert_eq!(cli.config, "prod.toml");
}
