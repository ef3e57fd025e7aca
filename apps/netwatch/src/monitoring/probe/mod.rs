//! Protocol probes.
//!
//! A probe performs one check against one target and always returns a
//! [`ProbeResult`]: failures are folded into the result, never raised.
//! Every probe bounds its own run time with a timeout.

mod dns;
mod echo;
mod http;
mod icmp;
mod ntp;
mod tcp;
mod udp;

pub use dns::DnsProbe;
pub use echo::{EchoProbe, GOODBYE};
pub use http::HttpProbe;
pub use icmp::{IcmpProbe, PathProbe};
pub use ntp::NtpProbe;
pub use tcp::TcpProbe;
pub use udp::UdpProbe;

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::types::{ProbeResult, Protocol};

#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Run one check against `target`
    async fn check(&self, target: &str) -> ProbeResult;
}

/// Failure inside a probe, reported through a failed result
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Timeout occurred after {0:?}")]
    Timeout(Duration),
    #[error("Connection error: {0}")]
    Connection(io::Error),
    #[error("Could not resolve {host}: {reason}")]
    Resolution { host: String, reason: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

/// Milliseconds since `start`, saturating
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Resolve `host:port` to its first address within `limit`
pub(crate) async fn resolve(host: &str, port: u16, limit: Duration) -> Result<SocketAddr, ProbeError> {
    let lookup = tokio::time::timeout(limit, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| ProbeError::Timeout(limit))?;

    lookup
        .map_err(|e| ProbeError::Resolution { host: host.to_string(), reason: e.to_string() })?
        .next()
        .ok_or_else(|| ProbeError::Resolution {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        })
}
