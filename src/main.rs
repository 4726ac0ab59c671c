//! # AVL Gateway
//!
//! Passive TCP listener ingesting Codec8 telemetry from GPS/AVL trackers.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first CLI argument, default `config/default.toml`)
//!    - Set up logging with tracing subscriber
//!    - Build the identity validator, place registry and record sink
//!
//! 2. **Main Loop**
//!    - Accept device connections, one session task each
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C stops accepting
//!    - Active sessions drain for the configured grace period
//!
//! Expected output:
//! ```text
//! INFO avl_gateway: AVL Gateway v0.1.0 starting...
//! INFO avl_gateway::server: Listening for devices on 0.0.0.0:4554
//! INFO avl_gateway::session: Device authenticated remote=10.0.0.7:50123 device=356307042441013
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use avl_gateway::config::{Config, LoggingConfig};
use avl_gateway::identity::ConfiguredValidator;
use avl_gateway::places::PlaceRegistry;
use avl_gateway::server::Acceptor;
use avl_gateway::storage;

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of daily-rolling diagnostic log files
const LOG_FILE_PREFIX: &str = "avl-gateway.log";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);

    info!("AVL Gateway v{} starting...", env!("CARGO_PKG_VERSION"));

    let validator = Arc::new(ConfiguredValidator::new(&config.identity));
    let places = Arc::new(PlaceRegistry::new(&config.places));
    if !places.is_empty() {
        info!("Matching records against {} places", places.len());
    }
    let sink = storage::from_config(&config.storage, places)
        .context("Failed to open record storage")?;

    let acceptor = Acceptor::bind(&config.server, validator, sink)
        .await
        .context("Failed to bind listener")?;

    info!("Press Ctrl+C to exit");
    acceptor
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down...");
        })
        .await?;

    info!("AVL Gateway stopped");
    Ok(())
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// must be held for file output to be flushed.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = if config.directory.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&config.directory, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}
