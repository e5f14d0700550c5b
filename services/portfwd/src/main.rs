//! portfwd
//!
//! Concurrent TCP port forwarder.
//!
//! This service:
//! - Loads a JSON list of (local, remote) address pairs
//! - Listens on every local address
//! - Relays each accepted connection to its remote address, bytes unmodified
//! - Drains all connections on SIGINT/SIGTERM before exiting

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use portfwd::config::{Config, PairList};
use portfwd::proxy::{watch_signals, ProxyOptions, ProxySet, Shutdown};
use portfwd::{logging, TracingSink};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(&config)?;

    info!("Starting portfwd");

    let pairs = PairList::load(&config.config_path).with_context(|| {
        format!(
            "Failed to load proxy pairs from {}",
            config.config_path.display()
        )
    })?;
    info!(
        config_path = %config.config_path.display(),
        pair_count = pairs.len(),
        log_payload = config.log_payload,
        "Configuration loaded"
    );

    // Create shutdown latch
    let (shutdown, shutdown_rx) = Shutdown::new();
    let signals = tokio::spawn(watch_signals(shutdown.clone()));

    let options =
        ProxyOptions::new(Arc::new(TracingSink)).with_tap_payload(config.log_payload);
    let proxies = ProxySet::from_pair_list(&pairs, &options).await;
    if proxies.is_empty() {
        signals.abort();
        anyhow::bail!("No usable proxy pairs in {}", config.config_path.display());
    }
    info!(listener_count = proxies.len(), "Listeners bound");

    // Blocks until every listener and relay has drained
    let exits = proxies.run(shutdown_rx).await;
    signals.abort();

    if !shutdown.is_triggered() {
        warn!(
            listener_count = exits.len(),
            "All listeners stopped without a shutdown signal"
        );
    }

    info!("portfwd shutdown complete");
    Ok(())
}
