//! Resolved (local, remote) endpoint pairs.

use std::fmt;
use std::net::SocketAddr;

use tokio::net::lookup_host;

use crate::config::ProxyPair;
use crate::error::ProxyError;

/// A forwarded pair with both endpoints resolved. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPair {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl AddressPair {
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self { local, remote }
    }

    /// Resolve both `host:port` strings. The remote side is resolved first.
    pub async fn resolve(local: &str, remote: &str) -> Result<Self, ProxyError> {
        let remote = resolve_one(remote).await?;
        let local = resolve_one(local).await?;
        Ok(Self { local, remote })
    }

    pub async fn from_config(pair: &ProxyPair) -> Result<Self, ProxyError> {
        Self::resolve(&pair.local_addr, &pair.remote_addr).await
    }
}

impl fmt::Display for AddressPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.local, self.remote)
    }
}

async fn resolve_one(addr: &str) -> Result<SocketAddr, ProxyError> {
    let mut addrs = lookup_host(addr).await.map_err(|source| ProxyError::Resolve {
        addr: addr.to_string(),
        source,
    })?;
    addrs
        .next()
        .ok_or_else(|| ProxyError::NoAddress(addr.to_string()))
}
