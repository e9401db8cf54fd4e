//! # Muster - cluster bootstrap coordinator
//!
//! Lets a fleet of peers form one cluster without a fixed seed list.
//! Each node polls discovery, waits for the candidate set to settle,
//! probes every candidate's seed-node route and then joins an existing
//! cluster or, as the lowest-addressed fresh node, initiates one.
//!
//! ## Architecture
//! ```text
//! Discovery → Poller → Stability → Prober → Decider → Membership
//!                                     ↕
//!                      peers' /bootstrap/seed-nodes
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod bootstrap;
mod cluster;
mod config;
mod discovery;
mod routes;
mod state;

use bootstrap::{BootstrapCoordinator, HttpProbeClient, decider_from_config};
use config::AppConfig;
use discovery::{Lookup, registration_worker};
use state::AppState;

/// Muster - cluster bootstrap coordinator
#[derive(Parser, Debug)]
#[command(name = "muster")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/muster.toml")]
    config: String,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Address reported to peers (overrides config)
    #[arg(long, env = "SELF_ADDRESS")]
    self_address: Option<String>,

    /// Management address published for peers to probe (overrides config)
    #[arg(long, env = "ADVERTISE_ADDRESS")]
    advertise_address: Option<String>,

    /// Discovery method: config, dns, redis or aggregate (overrides config)
    #[arg(long, env = "DISCOVERY_METHOD")]
    discovery_method: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Muster v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    config.validate().context("Invalid configuration")?;
    info!("Configuration loaded from {}", args.config);

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Discovery backend, plus self-registration when it is a registry
    let backend = discovery::from_config(&config).context("Failed to configure discovery")?;
    let register_self = config.discovery.redis.as_ref().is_some_and(|r| r.register_self);
    if let Some(registry) = backend.registry.clone().filter(|_| register_self) {
        let service = Lookup::from_config(&config).service_name;
        let member = config.management_address()?.to_string();
        let registry_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            registration_worker(registry, service, member, registry_shutdown).await;
        });
    }

    let decider = decider_from_config(&config.bootstrap.join_decider)?;
    let membership = cluster::from_config(&config.membership)?;

    // Spawn the coordinator; its first session starts after the bind so
    // our own seed-node route accepts the first probes
    let handle = BootstrapCoordinator::new(
        &config,
        backend.discovery,
        Arc::new(HttpProbeClient::new()),
        decider,
        membership,
    )
    .spawn(shutdown_tx.subscribe());

    let state = AppState::new(config.clone(), handle.clone());

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(
        listen = %config.listen_addr,
        self_address = %config.self_address(),
        "Muster listening"
    );
    handle.start().await?;

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
        if let Err(e) = handle.stop().await {
            tracing::warn!(error = %e, "Bootstrap coordinator already gone");
        }
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Muster shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
