//! Probe doubles for scheduler tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::probe::Probe;
use super::types::{PortState, ProbePayload, ProbeResult, Protocol, Transport};

/// Sleeps for `delay`, then reports a TCP port as open or closed
pub struct FakeProbe {
    pub delay: Duration,
    pub latency_ms: u64,
    pub up: bool,
    pub panics: bool,
    pub calls: Arc<AtomicUsize>,
}

impl FakeProbe {
    pub fn new(delay: Duration) -> Self {
        Self { delay, latency_ms: 1, up: true, panics: false, calls: Arc::default() }
    }

    pub fn failing() -> Self {
        Self { up: false, ..Self::new(Duration::ZERO) }
    }

    pub fn panicking() -> Self {
        Self { panics: true, ..Self::new(Duration::ZERO) }
    }
}

#[async_trait::async_trait]
impl Probe for FakeProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn check(&self, target: &str) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.panics {
            panic!("probe for {target} blew up");
        }

        let port = |state| ProbePayload::Port { transport: Transport::Tcp, port: 22, state };
        if self.up {
            ProbeResult::new(port(PortState::Open)).success(Some(self.latency_ms))
        } else {
            ProbeResult::new(port(PortState::Closed)).failure(format!("Port 22 on {target} is closed or not reachable."))
        }
    }
}
