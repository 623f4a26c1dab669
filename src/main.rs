//! Cultural Innovation Lab edge service.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client Request
//!   ──────────────▶ request id ─▶ trace ─▶ timeout ─▶ body limit
//!                                                        │
//!                                                        ▼
//!                    ┌──────────────── request pipeline ────────────────┐
//!                    │ session refresh → page protection → CSRF guard   │
//!                    └──────────────────────────┬───────────────────────┘
//!                                               ▼
//!                         api handlers (rate limit → validate → services)
//!                                               │
//!   Client Response                             ▼
//!   ◀────────────── token issuance, rate-limit headers, session cookies
//! ```
//!
//! Collaborators (identity, data store, payments, mail, AI) are in-memory in
//! this binary.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use cilab_edge::config::{load_config, load_from_env};
use cilab_edge::lifecycle::signals::spawn_signal_handler;
use cilab_edge::observability::{logging, metrics};
use cilab_edge::{HttpServer, Services, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "cilab-edge")]
#[command(about = "Request edge for the Cultural Innovation Lab site", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults plus environment when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "cilab-edge starting"
    );
    if config.csrf.ephemeral_secret {
        tracing::warn!(
            "CSRF_SECRET not set; using an ephemeral development secret, tokens will not survive a restart"
        );
    }
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        max_body_bytes = config.listener.max_body_bytes,
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

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config, Services::in_memory())?;
    server.run(listener, &shutdown).await?;

    signals.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}
