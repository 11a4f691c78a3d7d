//! HTTP CONNECT tunnel endpoint.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                 CONNECT TUNNEL                    │
//!                    │                                                   │
//!   CONNECT h:p      │  ┌─────────┐   ┌───────────┐   ┌──────────────┐  │
//!  ──────────────────┼─▶│   net   │──▶│ handshake │──▶│ interceptors │  │
//!                    │  │listener │   │  parser   │   └──────┬───────┘  │
//!                    │  └─────────┘   └───────────┘          │          │
//!                    │                                        ▼          │
//!   200 established  │  ┌───────────┐                 ┌──────────────┐  │
//!  ◀─────────────────┼──│ templates │◀────────────────│   upstream   │──┼──▶ target
//!                    │  └───────────┘                 │     dial     │  │
//!                    │                                └──────────────┘  │
//!   opaque bytes     │  ┌────────────────────────────────────────────┐  │
//!  ◀════════════════▶┼──│                   relay                    │◀═┼══▶ target
//!                    │  └────────────────────────────────────────────┘  │
//!                    └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use connect_tunnel::config::{load_config, watcher::ConfigWatcher, TunnelConfig};
use connect_tunnel::lifecycle::{signals, Shutdown};
use connect_tunnel::net::Listener;
use connect_tunnel::observability::{logging, metrics};
use connect_tunnel::TunnelServer;

#[derive(Parser)]
#[command(name = "connect-tunnel")]
#[command(about = "HTTP CONNECT tunnel endpoint", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Reload the configuration file when it changes.
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TunnelConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "connect-tunnel starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        handshake_timeout_secs = config.timeouts.handshake_secs,
        connect_timeout_secs = config.timeouts.connect_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must stay alive for reloads to keep arriving.
    let (config_updates, _watcher) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (updates, Some(watcher.run()?))
        }
        _ => (mpsc::unbounded_channel().1, None),
    };

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    signals::spawn_signal_handler(shutdown.clone());

    let server = TunnelServer::new(config);
    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
