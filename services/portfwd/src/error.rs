//! Error types for the forwarder.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while setting up a forwarded address pair.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Address lookup failed.
    #[error("resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Address lookup succeeded but returned nothing usable.
    #[error("resolve {0}: no addresses found")]
    NoAddress(String),

    /// Could not bind the local endpoint.
    #[error("listen {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Could not connect to the upstream endpoint.
    #[error("dial {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Shutdown fired before the upstream dial completed.
    #[error("dial {0}: cancelled by shutdown")]
    DialCancelled(SocketAddr),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while loading the pair list.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither the given path nor its base name could be read.
    #[error("read {path}: {primary} {fallback}")]
    Read {
        path: PathBuf,
        primary: io::Error,
        fallback: io::Error,
    },

    /// The file is not valid JSON for the pair list.
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// One entry of the pair list is malformed.
    #[error("proxy_pairs[{index}]: {source}")]
    Entry {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl ProxyError {
    /// Short reason code used in log lines.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ProxyError::Resolve { .. } => "resolve_failed",
            ProxyError::NoAddress(_) => "no_address",
            ProxyError::Bind { .. } => "bind_failed",
            ProxyError::Dial { .. } => "dial_failed",
            ProxyError::DialCancelled(_) => "dial_cancelled",
            ProxyError::Io(_) => "io_error",
        }
    }
}
