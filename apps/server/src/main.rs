//! Ember Server - Standalone headless server for Ember Jams.
//!
//! Hosts the sync bus, the media library and the PCM streaming engine for
//! any number of jam rooms on the local network. Clients connect with a
//! room code; there is no GUI here.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ember_core::{bootstrap_services, start_server};
use tokio::signal;

use crate::config::ServerConfig;

/// Ember Server - Headless LAN jam-session server.
#[derive(Parser, Debug)]
#[command(name = "ember-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "EMBER_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Downloads directory (overrides config file).
    #[arg(short = 'd', long)]
    downloads_dir: Option<PathBuf>,

    /// Library index path (overrides config file).
    #[arg(short = 'i', long)]
    library_index: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Ember Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(dir) = args.downloads_dir {
        config.downloads_dir = dir;
    }
    if let Some(index) = args.library_index {
        config.library_index = index;
    }

    log::info!(
        "Configuration: bind={}:{}, downloads={}, index={}",
        config.bind_addr,
        config.bind_port,
        config.downloads_dir.display(),
        config.library_index.display()
    );

    // Bootstrap services (opens the library, prepares the downloads dir)
    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    print_lan_hint(&core_config);

    // Spawn the WS/HTTP server
    let app_state = services.app_state();
    let addr = core_config.bind_socket_addr();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, addr).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: close every client connection, then stop serving.
    services.shutdown();
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Logs the URL other devices on the LAN should use to reach this server.
fn print_lan_hint(config: &ember_core::Config) {
    if !config.bind_addr.is_unspecified() {
        log::info!(
            "Server accessible at http://{}:{}",
            config.bind_addr,
            config.bind_port
        );
        return;
    }
    match local_ip_address::local_ip() {
        Ok(ip) if !ip.is_loopback() => {
            log::info!("To connect from another device on your network, use:");
            log::info!("  http://{}:{}", ip, config.bind_port);
        }
        _ => {
            log::info!("To connect from another device, use your LAN IPv4 address");
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
