use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::{Probe, ProbeError, elapsed_ms, resolve};
use crate::monitoring::types::{PortState, ProbePayload, ProbeResult, Protocol, Transport};

/// UDP port check
///
/// Sends one empty datagram on a connected socket. A connected socket lets
/// the kernel report an ICMP port-unreachable as `ConnectionRefused`, which
/// is the only definite "closed" signal UDP offers.
pub struct UdpProbe {
    port: u16,
    timeout: Duration,
}

enum Outcome {
    Reply(usize),
    Refused,
    Silent,
}

impl UdpProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    async fn exchange(&self, target: &str) -> Result<Outcome, ProbeError> {
        let addr = resolve(target, self.port, self.timeout).await?;
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;

        match socket.send(&[]).await {
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => return Ok(Outcome::Refused),
            other => other?,
        };

        let mut buf = [0u8; 1024];
        match timeout(self.timeout, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => Ok(Outcome::Reply(len)),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => Ok(Outcome::Refused),
            Ok(Err(e)) => Err(ProbeError::Io(e)),
            Err(_) => Ok(Outcome::Silent),
        }
    }
}

#[async_trait::async_trait]
impl Probe for UdpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    async fn check(&self, target: &str) -> ProbeResult {
        let port = self.port;
        let report = |state| ProbeResult::new(ProbePayload::Port { transport: Transport::Udp, port, state });
        let start = Instant::now();

        match self.exchange(target).await {
            Ok(Outcome::Reply(len)) => report(PortState::Responding)
                .success(Some(elapsed_ms(start)))
                .with_description(format!("Port {port} on {target} answered with {len} bytes.")),
            Ok(Outcome::Refused) => report(PortState::Closed).failure(format!("Port {port} on {target} is closed.")),
            Ok(Outcome::Silent) => report(PortState::OpenOrFiltered)
                .inconclusive(format!("Port {port} on {target} is open or no response received.")),
            Err(e) => report(PortState::Error)
                .failure(format!("Failed to check UDP port {port} on {target} due to an error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::ProbeStatus;

    fn state_of(result: &ProbeResult) -> PortState {
        match result.payload {
            ProbePayload::Port { state, .. } => state,
            ref other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_responding_port() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(b"pong", peer).await.unwrap();
        });

        let result = UdpProbe::new(port, Duration::from_secs(2)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Up);
        assert_eq!(state_of(&result), PortState::Responding);
    }

    #[tokio::test]
    async fn test_closed_port() {
        let port = {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            socket.local_addr().unwrap().port()
        };

        let result = UdpProbe::new(port, Duration::from_secs(2)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Down);
        assert_eq!(state_of(&result), PortState::Closed);
    }

    #[tokio::test]
    async fn test_silent_port_is_inconclusive() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let result = UdpProbe::new(port, Duration::from_millis(200)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Unknown);
        assert_eq!(state_of(&result), PortState::OpenOrFiltered);
        drop(server);
    }
}
