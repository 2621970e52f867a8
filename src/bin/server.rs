//! RuleFlow HTTP Server Binary
//!
//! Boots the rules service from configuration, starts the background
//! reload monitor, and serves the HTTP API plus the change-event
//! WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Start with ruleflow.toml / RULEFLOW_* environment
//! ruleflow-server
//!
//! # Start with an explicit configuration file
//! ruleflow-server --config /etc/ruleflow/ruleflow.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use ruleflow::api;
use ruleflow::{Config, RuleService};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "ruleflow-server", version, about = "Business rules service")]
struct Args {
    /// Configuration file (defaults to ruleflow.toml + environment)
    #[arg(long)]
    config: Option<String>,

    /// Override the bind address
    #[arg(long)]
    addr: Option<String>,
}

fn init_tracing(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .init();
    }
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    // Keep the flush guard alive for the process lifetime.
    let _log_guard = init_tracing(&config);

    let bind_addr = args
        .addr
        .clone()
        .unwrap_or_else(|| config.http.bind_addr.clone());
    let http_config = config.http.clone();

    let service = Arc::new(
        tokio::task::spawn_blocking(move || RuleService::from_config(config))
            .await
            .context("service startup task failed")??,
    );
    info!(
        registry_version = service.status().registry.registry_version,
        rule_count = service.status().registry.rule_count,
        "rule catalog loaded"
    );

    if service.start_monitoring() {
        info!("background reload monitor started");
    }

    let events = api::spawn_event_bridge(&service);
    let router = api::router(Arc::clone(&service), events, &http_config);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "ruleflow server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    service.stop_monitoring();
    service.flush_logs();
    Ok(())
}
