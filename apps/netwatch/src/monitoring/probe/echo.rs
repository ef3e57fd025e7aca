use rand::Rng;
use rand::seq::SliceRandom;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{Probe, ProbeError, elapsed_ms};
use crate::monitoring::types::{EchoExchange, ProbePayload, ProbeResult, Protocol};

/// Terminates a session with the echo server
pub const GOODBYE: &str = "Goodbye";

const WORDS: [&str; 16] = [
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "labore", "magna", "aliqua",
];

/// Loop-back echo check against the bundled echo server
pub struct EchoProbe {
    port: u16,
    timeout: Duration,
}

impl EchoProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    async fn converse(
        &self,
        stream: &mut TcpStream,
        exchanges: &mut Vec<EchoExchange>,
    ) -> Result<(), ProbeError> {
        for message in random_messages() {
            timeout(self.timeout, stream.write_all(message.as_bytes()))
                .await
                .map_err(|_| ProbeError::Timeout(self.timeout))??;

            let read = timeout(self.timeout, read_echo(stream, message.len())).await;
            let received = match read {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    exchanges.push(EchoExchange { sent: message, received: None });
                    return Err(e.into());
                }
                Err(_) => {
                    exchanges.push(EchoExchange { sent: message, received: None });
                    return Err(ProbeError::Timeout(self.timeout));
                }
            };

            let closed = received.is_none();
            exchanges.push(EchoExchange { sent: message, received });
            if closed {
                return Err(ProbeError::Protocol("server closed the connection".to_string()));
            }
        }

        timeout(self.timeout, stream.write_all(GOODBYE.as_bytes()))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;
        Ok(())
    }
}

/// Read until `expected` bytes arrived or the server closed the connection
async fn read_echo(stream: &mut TcpStream, expected: usize) -> io::Result<Option<String>> {
    let mut received = Vec::with_capacity(expected);
    let mut buf = [0u8; 1024];
    while received.len() < expected {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }

    if received.is_empty() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&received).into_owned()))
}

/// One to three short sentences
fn random_messages() -> Vec<String> {
    let mut rng = rand::thread_rng();
    let count = rng.gen_range(1..=3);

    (0..count)
        .map(|_| {
            let len = rng.gen_range(3..=8);
            let words: Vec<&str> = (0..len).filter_map(|_| WORDS.choose(&mut rng).copied()).collect();
            let mut sentence = words.join(" ");
            if let Some(first) = sentence.get_mut(..1) {
                first.make_ascii_uppercase();
            }
            sentence.push('.');
            sentence
        })
        .collect()
}

#[async_trait::async_trait]
impl Probe for EchoProbe {
    fn protocol(&self) -> Protocol {
        Protocol::LocalTcp
    }

    async fn check(&self, target: &str) -> ProbeResult {
        let port = self.port;
        let start = Instant::now();

        let mut stream = match timeout(self.timeout, TcpStream::connect((target, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return ProbeResult::new(ProbePayload::Echo { port, exchanges: Vec::new() })
                    .failure(format!("Port {port} on {target} is closed or not reachable: {e}"));
            }
            Err(_) => {
                return ProbeResult::new(ProbePayload::Echo { port, exchanges: Vec::new() })
                    .failure(format!("Port {port} on {target} timed out."));
            }
        };

        let mut exchanges = Vec::new();
        let outcome = self.converse(&mut stream, &mut exchanges).await;
        let latency = elapsed_ms(start);
        let mismatches = exchanges.iter().filter(|exchange| !exchange.matched()).count();
        let result = ProbeResult::new(ProbePayload::Echo { port, exchanges });

        match outcome {
            Err(e) => result.failure(format!("Echo with {target}:{port} failed: {e}")).with_latency(latency),
            Ok(()) if mismatches > 0 => result
                .failure(format!("{mismatches} echo replies from {target}:{port} did not match"))
                .with_latency(latency),
            Ok(()) => result
                .success(Some(latency))
                .with_description(format!("Port {port} on {target} is open and echoing.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::ProbeStatus;
    use tokio::net::TcpListener;

    #[test]
    fn test_random_messages_shape() {
        for _ in 0..20 {
            let messages = random_messages();
            assert!((1..=3).contains(&messages.len()));
            for message in messages {
                assert!(message.ends_with('.'));
                assert!(message.len() <= 1024);
                assert!(message.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            }
        }
    }

    #[tokio::test]
    async fn test_matching_echo_is_up() {
        let server = crate::echo_server::EchoServer::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(server.run_until(async move {
            let _ = stop_rx.await;
        }));

        let result = EchoProbe::new(port, Duration::from_secs(2)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Up, "{:?}", result.description);
        match &result.payload {
            ProbePayload::Echo { exchanges, .. } => {
                assert!(!exchanges.is_empty());
                assert!(exchanges.iter().all(EchoExchange::matched));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wrong_echo_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 || &buf[..n] == GOODBYE.as_bytes() {
                    break;
                }
                if socket.write_all(&buf[..n].to_ascii_uppercase()).await.is_err() {
                    break;
                }
            }
        });

        let result = EchoProbe::new(port, Duration::from_secs(2)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Down);
        assert!(result.description.unwrap().contains("did not match"));
    }

    #[tokio::test]
    async fn test_echo_split_across_writes_is_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 || &buf[..n] == GOODBYE.as_bytes() {
                    break;
                }
                let (head, tail) = buf[..n].split_at(n / 2);
                if socket.write_all(head).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                if socket.write_all(tail).await.is_err() {
                    break;
                }
            }
        });

        let result = EchoProbe::new(port, Duration::from_secs(2)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Up, "{:?}", result.description);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let result = EchoProbe::new(port, Duration::from_millis(200)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Down);
        assert!(result.description.unwrap().contains("Timeout occurred"));
    }

    #[tokio::test]
    async fn test_closed_port() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = EchoProbe::new(port, Duration::from_secs(1)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Down);
        assert!(result.description.unwrap().contains("closed or not reachable"));
    }
}
