//! TCP relay core.
//!
//! This module provides:
//! - Address pair resolution
//! - One listener (accept loop) per forwarded pair
//! - One relay pair per accepted connection, with a copy task per direction
//! - The shutdown latch and the close-once gate that coordinate teardown
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> RelayPair -> Upstream
//!               |           |
//!           Shutdown ---> CloseGate (client->upstream, upstream->client, watcher)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use portfwd::{ProxyOptions, ProxySet, Shutdown, TracingSink};
//!
//! let (shutdown, shutdown_rx) = Shutdown::new();
//! let options = ProxyOptions::new(Arc::new(TracingSink));
//! let proxies = ProxySet::build(&pairs, &options).await;
//! tokio::spawn(portfwd::proxy::watch_signals(shutdown));
//! proxies.run(shutdown_rx).await;
//! ```

mod address;
mod close;
mod listener;
mod relay;
mod set;
mod shutdown;

pub use address::AddressPair;
pub use close::{CloseGate, Closed};
pub use listener::{Listener, ListenerConfig, ListenerExit, ListenerStats};
pub use relay::{
    relay, CopyOutcome, Direction, DirectionSummary, RelayPair, RelayReport, RelayState,
    COPY_BUFFER_SIZE,
};
pub use set::{ProxyOptions, ProxySet};
pub use shutdown::{watch_signals, Shutdown, ShutdownRx};
