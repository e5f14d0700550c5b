//! Relay pair: one accepted client connection and its upstream connection.
//!
//! Each pair runs two copy tasks (one per direction) plus a watcher for the
//! shutdown latch. Whichever finishes first closes the pair through its
//! [`CloseGate`]; the other tasks see the gate and wind down without closing
//! again. [`RelayPair::run`] returns only after all three tasks are done.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinError;

use super::close::{CloseGate, Closed};
use super::shutdown::ShutdownRx;
use crate::error::ProxyError;
use crate::logging::PrefixLogger;

/// Copy buffer size per direction.
pub const COPY_BUFFER_SIZE: usize = 8192;

/// Lifecycle of a relay pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayState {
    Connecting = 0,
    Relaying = 1,
    Closing = 2,
    Closed = 3,
}

impl RelayState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RelayState::Connecting,
            1 => RelayState::Relaying,
            2 => RelayState::Closing,
            _ => RelayState::Closed,
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::Connecting => "Connecting",
            RelayState::Relaying => "Relaying",
            RelayState::Closing => "Closing",
            RelayState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Copy direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    /// Head used for payload dumps of this direction.
    fn tap_head(self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "recv:",
            Direction::UpstreamToClient => "send:",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => f.write_str("copy to upstream"),
            Direction::UpstreamToClient => f.write_str("copy to client"),
        }
    }
}

/// Why a copy task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The source reached end of stream.
    Eof,
    /// The pair was closed by the other direction or by shutdown.
    TornDown,
    /// Read or write failed.
    Failed(String),
}

impl fmt::Display for CopyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyOutcome::Eof => f.write_str("nil"),
            CopyOutcome::TornDown => f.write_str("closed"),
            CopyOutcome::Failed(e) => f.write_str(e),
        }
    }
}

/// Result of one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionSummary {
    pub direction: Direction,
    pub bytes: u64,
    pub outcome: CopyOutcome,
}

/// Result of a finished relay pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub id: u64,
    pub to_upstream: DirectionSummary,
    pub to_client: DirectionSummary,
}

/// State shared by the tasks of one pair.
struct PairShared {
    state: AtomicU8,
    gate: CloseGate,
    logger: PrefixLogger,
}

impl PairShared {
    fn state(&self) -> RelayState {
        RelayState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RelayState) {
        self.state.store(state as u8, Ordering::Release);
        self.logger.log(format_args!("state: {}", state));
    }

    /// Close both sockets if nobody has yet.
    fn close(&self, reason: &str) -> bool {
        if !self.gate.close() {
            return false;
        }
        self.set_state(RelayState::Closing);
        self.logger.log(format_args!("close conn: {}", reason));
        true
    }
}

/// A connected client/upstream pair.
///
/// Exists only once the upstream dial has succeeded.
pub struct RelayPair {
    id: u64,
    client: TcpStream,
    upstream: TcpStream,
    shared: Arc<PairShared>,
}

impl RelayPair {
    /// Dial `remote` on behalf of `client`.
    ///
    /// The dial is abandoned if `shutdown` fires first. On failure or
    /// cancellation the client socket is dropped (closed) and no pair exists.
    pub async fn connect(
        id: u64,
        client: TcpStream,
        remote: SocketAddr,
        mut shutdown: ShutdownRx,
        logger: PrefixLogger,
    ) -> Result<Self, ProxyError> {
        match (client.peer_addr(), client.local_addr()) {
            (Ok(peer), Ok(local)) => {
                logger.log(format_args!("new client: peer={}, local={}", peer, local))
            }
            _ => logger.log(format_args!("new client")),
        }

        logger.log(format_args!("dial upstream: {}", remote));
        let dialed = tokio::select! {
            biased;
            _ = shutdown.wait() => None,
            dialed = TcpStream::connect(remote) => Some(dialed),
        };

        let upstream = match dialed {
            Some(Ok(upstream)) => upstream,
            Some(Err(source)) => {
                logger.log(format_args!("upstream dial {} failed: {}", remote, source));
                drop(client);
                return Err(ProxyError::Dial { addr: remote, source });
            }
            None => {
                logger.log(format_args!("upstream dial {} cancelled by shutdown", remote));
                drop(client);
                return Err(ProxyError::DialCancelled(remote));
            }
        };

        client.set_nodelay(true).ok();
        upstream.set_nodelay(true).ok();

        if let (Ok(local), Ok(peer)) = (upstream.local_addr(), upstream.peer_addr()) {
            logger.log(format_args!(
                "upstream connected: local={}, remote={}",
                local, peer
            ));
        }

        let shared = Arc::new(PairShared {
            state: AtomicU8::new(RelayState::Connecting as u8),
            gate: CloseGate::new(),
            logger,
        });
        shared.set_state(RelayState::Relaying);

        Ok(Self {
            id,
            client,
            upstream,
            shared,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RelayState {
        self.shared.state()
    }

    /// Relay until either direction ends or `shutdown` fires.
    ///
    /// When `tap_payload` is set every relayed chunk is also dumped to the
    /// pair's logger as hex.
    pub async fn run(self, shutdown: ShutdownRx, tap_payload: bool) -> RelayReport {
        let RelayPair {
            id,
            client,
            upstream,
            shared,
        } = self;

        let (client_read, client_write) = client.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();

        let to_upstream = tokio::spawn(copy_task(
            Arc::clone(&shared),
            Direction::ClientToUpstream,
            client_read,
            upstream_write,
            tap_payload,
        ));
        let to_client = tokio::spawn(copy_task(
            Arc::clone(&shared),
            Direction::UpstreamToClient,
            upstream_read,
            client_write,
            tap_payload,
        ));

        let (done_tx, done_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_shutdown(Arc::clone(&shared), shutdown, done_rx));

        let (to_upstream, to_client) = tokio::join!(to_upstream, to_client);
        let to_upstream = joined(&shared, Direction::ClientToUpstream, to_upstream);
        let to_client = joined(&shared, Direction::UpstreamToClient, to_client);

        // Retire the watcher; it may already be gone if shutdown closed us.
        let _ = done_tx.send(());
        let _ = watcher.await;

        shared.set_state(RelayState::Closed);
        shared.logger.log(format_args!("exit"));

        RelayReport {
            id,
            to_upstream,
            to_client,
        }
    }
}

/// Dial `remote` and relay `client` through it.
pub async fn relay(
    id: u64,
    client: TcpStream,
    remote: SocketAddr,
    shutdown: ShutdownRx,
    logger: PrefixLogger,
    tap_payload: bool,
) -> Result<RelayReport, ProxyError> {
    let pair = RelayPair::connect(id, client, remote, shutdown.clone(), logger).await?;
    Ok(pair.run(shutdown, tap_payload).await)
}

async fn copy_task<R, W>(
    shared: Arc<PairShared>,
    direction: Direction,
    reader: R,
    writer: W,
    tap_payload: bool,
) -> DirectionSummary
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let tap = tap_payload.then(|| shared.logger.child(direction.tap_head()));
    let (bytes, outcome) =
        copy_until_closed(reader, writer, shared.gate.subscribe(), tap.as_ref()).await;

    // A torn-down copy was stopped by whoever already closed the pair.
    if outcome != CopyOutcome::TornDown {
        shared.close(&format!("{} finished", direction));
    }

    shared.logger.log(format_args!(
        "summary: {} {} bytes, exit err: {}",
        direction, bytes, outcome
    ));

    DirectionSummary {
        direction,
        bytes,
        outcome,
    }
}

async fn watch_shutdown(
    shared: Arc<PairShared>,
    mut shutdown: ShutdownRx,
    done: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = shutdown.wait() => {
            shared.close("shutdown");
        }
        _ = done => {}
    }
}

fn joined(
    shared: &PairShared,
    direction: Direction,
    result: Result<DirectionSummary, JoinError>,
) -> DirectionSummary {
    match result {
        Ok(summary) => summary,
        Err(e) => {
            shared.close(&format!("{} task failed", direction));
            DirectionSummary {
                direction,
                bytes: 0,
                outcome: CopyOutcome::Failed(e.to_string()),
            }
        }
    }
}

/// Copy `reader` into `writer` until end of stream, an error, or `closed`.
///
/// Returns the number of bytes fully written to `writer`.
pub(crate) async fn copy_until_closed<R, W>(
    mut reader: R,
    mut writer: W,
    mut closed: Closed,
    tap: Option<&PrefixLogger>,
) -> (u64, CopyOutcome)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            _ = closed.wait() => return (total, CopyOutcome::TornDown),
            read = reader.read(&mut buf) => match read {
                Ok(0) => return (total, CopyOutcome::Eof),
                Ok(n) => n,
                Err(e) => return (total, CopyOutcome::Failed(e.to_string())),
            },
        };

        if let Some(tap) = tap {
            tap.payload(&buf[..n]);
        }

        tokio::select! {
            biased;
            _ = closed.wait() => return (total, CopyOutcome::TornDown),
            written = writer.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    return (total, CopyOutcome::Failed(e.to_string()));
                }
            }
        }
        total += n as u64;
    }
}
