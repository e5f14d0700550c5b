//! One listener per configured pair, run together.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use super::address::AddressPair;
use super::listener::{Listener, ListenerConfig, ListenerExit, ListenerStats};
use super::shutdown::ShutdownRx;
use crate::config::{PairList, ProxyPair};
use crate::logging::{LogSink, PrefixLogger};

/// Options shared by every listener of a set.
#[derive(Clone)]
pub struct ProxyOptions {
    pub sink: Arc<dyn LogSink>,
    pub tap_payload: bool,
}

impl ProxyOptions {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            tap_payload: false,
        }
    }

    pub fn with_tap_payload(mut self, tap_payload: bool) -> Self {
        self.tap_payload = tap_payload;
        self
    }
}

/// The bound listeners of every usable pair.
pub struct ProxySet {
    listeners: Vec<Listener>,
}

impl ProxySet {
    /// Resolve and bind every pair. Pairs that fail are logged and skipped.
    pub async fn build(pairs: &[ProxyPair], options: &ProxyOptions) -> Self {
        let mut listeners = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if let Some(listener) = bind_pair(pair, options).await {
                listeners.push(listener);
            }
        }
        Self { listeners }
    }

    /// Like [`ProxySet::build`], skipping entries of the list that do not decode.
    pub async fn from_pair_list(list: &PairList, options: &ProxyOptions) -> Self {
        let config_logger = PrefixLogger::new("[Config]", Arc::clone(&options.sink));
        let mut pairs = Vec::with_capacity(list.len());
        for entry in list.entries() {
            match entry {
                Ok(pair) => pairs.push(pair),
                Err(e) => config_logger.log(format_args!("skip entry: {}", e)),
            }
        }
        Self::build(&pairs, options).await
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Bound local addresses, in configuration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect()
    }

    /// Statistics handles, in configuration order.
    pub fn stats(&self) -> Vec<Arc<ListenerStats>> {
        self.listeners.iter().map(Listener::stats).collect()
    }

    /// Run every listener until it exits.
    ///
    /// Returns once all listeners and all of their relays have finished.
    pub async fn run(self, shutdown: ShutdownRx) -> Vec<ListenerExit> {
        let handles: Vec<_> = self
            .listeners
            .into_iter()
            .map(|listener| {
                let local_addr = listener.local_addr().ok();
                let remote_addr = listener.remote_addr();
                let handle = tokio::spawn(listener.run(shutdown.clone()));
                (local_addr, remote_addr, handle)
            })
            .collect();

        let mut exits = Vec::with_capacity(handles.len());
        for (local_addr, remote_addr, handle) in handles {
            match handle.await {
                Ok(exit) => {
                    info!(
                        local_addr = ?local_addr,
                        remote_addr = %remote_addr,
                        exit = %exit,
                        "Listener stopped"
                    );
                    exits.push(exit);
                }
                Err(e) => error!(remote_addr = %remote_addr, error = %e, "Listener task panicked"),
            }
        }
        exits
    }
}

async fn bind_pair(pair: &ProxyPair, options: &ProxyOptions) -> Option<Listener> {
    let logger = PrefixLogger::new(
        format!("[Proxy {} to {}]", pair.local_addr, pair.remote_addr),
        Arc::clone(&options.sink),
    );

    let resolved = match AddressPair::from_config(pair).await {
        Ok(resolved) => resolved,
        Err(e) => {
            logger.log(format_args!("new proxy error: {}", e));
            return None;
        }
    };

    let mut config = ListenerConfig::new(resolved);
    config.tap_payload = options.tap_payload;

    match Listener::bind(config, logger).await {
        Ok(listener) => Some(listener),
        Err(e) => {
            error!(local_addr = %resolved.local, error = %e, "Failed to bind listener");
            None
        }
    }
}
