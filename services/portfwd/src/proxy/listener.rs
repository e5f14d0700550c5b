//! TCP listener for one forwarded address pair.
//!
//! The listener owns the bound socket and an accept loop. Every accepted
//! connection is handed to its own relay task immediately, so accepting never
//! waits on earlier connections. On shutdown the bound socket is dropped
//! (closed once) and the listener waits for its relays before returning.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::Instrument;

use super::address::AddressPair;
use super::relay::relay;
use super::shutdown::ShutdownRx;
use crate::error::ProxyError;
use crate::logging::PrefixLogger;

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Local and remote endpoints.
    pub pair: AddressPair,
    /// Dump relayed payload to the logger.
    pub tap_payload: bool,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(pair: AddressPair) -> Self {
        Self {
            pair,
            tap_payload: false,
        }
    }
}

/// Statistics for a listener. Informational only.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently being handled.
    pub connections_active: AtomicU64,
    /// Connections finished (relayed or failed).
    pub connections_closed: AtomicU64,
    /// Upstream dial failures.
    pub upstream_failed: AtomicU64,
    /// Bytes relayed client to upstream.
    pub bytes_to_upstream: AtomicU64,
    /// Bytes relayed upstream to client.
    pub bytes_from_upstream: AtomicU64,
}

/// Why a listener stopped accepting.
#[derive(Debug)]
pub enum ListenerExit {
    /// The shutdown latch fired.
    Cancelled,
    /// Accept failed while no shutdown was in progress.
    AcceptFailed(io::Error),
}

impl fmt::Display for ListenerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerExit::Cancelled => f.write_str("cancelled"),
            ListenerExit::AcceptFailed(e) => write!(f, "accept failed: {}", e),
        }
    }
}

/// A bound listener for one address pair.
pub struct Listener {
    config: ListenerConfig,
    listener: TcpListener,
    logger: PrefixLogger,
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the local endpoint of `config.pair`.
    pub async fn bind(config: ListenerConfig, logger: PrefixLogger) -> Result<Self, ProxyError> {
        let bind_addr = config.pair.local;
        logger.log(format_args!("listen: {}", bind_addr));

        let listener = TcpListener::bind(bind_addr).await.map_err(|source| {
            logger.log(format_args!("listen err: {}", source));
            ProxyError::Bind {
                addr: bind_addr,
                source,
            }
        })?;

        Ok(Self {
            config,
            listener,
            logger,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.config.pair.remote
    }

    /// Get listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept and relay connections until shutdown or an accept failure.
    ///
    /// Returns after every relay spawned by this listener has finished.
    pub async fn run(self, shutdown: ShutdownRx) -> ListenerExit {
        let Listener {
            config,
            listener,
            logger,
            stats,
        } = self;

        let local_addr = listener.local_addr().unwrap_or(config.pair.local);
        serve(listener, local_addr, config, logger, stats, shutdown).await
    }
}

/// Source of accepted connections.
trait Accept: Send {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Classify an accept failure.
///
/// Once shutdown has fired, a failing accept is part of the teardown.
fn accept_exit(e: io::Error, shutdown: &ShutdownRx) -> ListenerExit {
    if shutdown.is_triggered() {
        ListenerExit::Cancelled
    } else {
        ListenerExit::AcceptFailed(e)
    }
}

async fn serve<A: Accept>(
    mut acceptor: A,
    local_addr: SocketAddr,
    config: ListenerConfig,
    logger: PrefixLogger,
    stats: Arc<ListenerStats>,
    shutdown: ShutdownRx,
) -> ListenerExit {
    let mut relays = JoinSet::new();
    let mut next_id = 0u64;
    let mut cancel = shutdown.clone();

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.wait() => {
                logger.log(format_args!("shutdown, close listener"));
                break ListenerExit::Cancelled;
            }
            Some(joined) = relays.join_next(), if !relays.is_empty() => {
                if let Err(e) = joined {
                    logger.log(format_args!("relay task failed: {}", e));
                }
            }
            accepted = acceptor.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    next_id += 1;
                    stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                    stats.connections_active.fetch_add(1, Ordering::Relaxed);

                    let handler = handle_connection(
                        next_id,
                        stream,
                        config.clone(),
                        shutdown.clone(),
                        logger.child(format!("[ClientID:{}]", next_id)),
                        Arc::clone(&stats),
                    );
                    relays.spawn(handler.instrument(tracing::info_span!(
                        "connection",
                        listener = %local_addr,
                        id = next_id,
                        peer = %peer_addr
                    )));
                }
                Err(e) => {
                    logger.log(format_args!("accept err: {}", e));
                    // Existing relays keep running until they end or
                    // shutdown closes them.
                    break accept_exit(e, &shutdown);
                }
            },
        }
    };

    drop(acceptor);
    logger.log(format_args!(
        "listener closed, draining {} relays",
        relays.len()
    ));

    while let Some(joined) = relays.join_next().await {
        if let Err(e) = joined {
            logger.log(format_args!("relay task failed: {}", e));
        }
    }

    logger.log(format_args!("proxy exit: {}", exit));
    exit
}

async fn handle_connection(
    id: u64,
    stream: TcpStream,
    config: ListenerConfig,
    shutdown: ShutdownRx,
    logger: PrefixLogger,
    stats: Arc<ListenerStats>,
) {
    match relay(
        id,
        stream,
        config.pair.remote,
        shutdown,
        logger,
        config.tap_payload,
    )
    .await
    {
        Ok(report) => {
            stats
                .bytes_to_upstream
                .fetch_add(report.to_upstream.bytes, Ordering::Relaxed);
            stats
                .bytes_from_upstream
                .fetch_add(report.to_client.bytes, Ordering::Relaxed);
        }
        Err(ProxyError::DialCancelled(addr)) => {
            tracing::debug!(remote_addr = %addr, "Upstream dial cancelled");
        }
        Err(e) => {
            stats.upstream_failed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "Upstream dial failed");
        }
    }

    stats.connections_active.fetch_sub(1, Ordering::Relaxed);
    stats.connections_closed.fetch_add(1, Ordering::Relaxed);
}
