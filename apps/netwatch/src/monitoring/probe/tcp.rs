use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{Probe, elapsed_ms};
use crate::monitoring::types::{PortState, ProbePayload, ProbeResult, Protocol, Transport};

/// TCP connect check
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait::async_trait]
impl Probe for TcpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn check(&self, target: &str) -> ProbeResult {
        let port = self.port;
        let report = |state| ProbeResult::new(ProbePayload::Port { transport: Transport::Tcp, port, state });
        let start = Instant::now();

        match timeout(self.timeout, TcpStream::connect((target, port))).await {
            Ok(Ok(_stream)) => report(PortState::Open)
                .success(Some(elapsed_ms(start)))
                .with_description(format!("Port {port} on {target} is open.")),
            Err(_) => report(PortState::TimedOut)
                .failure(format!("Port {port} on {target} timed out."))
                .with_latency(elapsed_ms(start)),
            Ok(Err(e)) if is_unreachable(e.kind()) => {
                report(PortState::Closed).failure(format!("Port {port} on {target} is closed or not reachable."))
            }
            Ok(Err(e)) => report(PortState::Error)
                .failure(format!("Failed to check port {port} on {target} due to an error: {e}")),
        }
    }
}

fn is_unreachable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::AddrNotAvailable
    )
}
