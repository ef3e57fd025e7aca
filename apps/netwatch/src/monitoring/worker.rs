use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::cancel::CancelSignal;
use super::probe::Probe;
use super::report::{ReportBlock, ReportSink};
use super::types::Protocol;

/// One (target, protocol) pair ready to run
pub struct WorkerSpec {
    pub target: String,
    pub protocol: Protocol,
    pub interval: Duration,
    pub probe: Arc<dyn Probe>,
    /// Successful probes slower than this are reported as degraded
    pub degraded_threshold_ms: u64,
}

/// Keeps the session's live-worker count honest, even if the task unwinds
pub(crate) struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    pub(crate) fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Periodic probe loop for one pair
///
/// Cancellation is observed before every probe and during the interval
/// wait, never in the middle of a probe. Returns the number of reports
/// emitted.
pub(crate) async fn run(
    spec: WorkerSpec,
    sink: Arc<dyn ReportSink>,
    cancel: CancelSignal,
    _active: ActiveGuard,
) -> u64 {
    let WorkerSpec { target, protocol, interval, probe, degraded_threshold_ms } = spec;
    let mut emitted = 0u64;

    debug!(server = %target, %protocol, interval_secs = interval.as_secs(), "worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let result = probe.check(&target).await.classify_latency(degraded_threshold_ms);
        debug!(server = %target, %protocol, status = %result.status, latency_ms = ?result.latency_ms, "probe finished");

        let block = ReportBlock::from_result(protocol, &target, &result);
        match sink.emit(&block) {
            Ok(()) => emitted += 1,
            Err(e) => warn!(server = %target, %protocol, "failed to write report: {}", e),
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }

    debug!(server = %target, %protocol, emitted, "worker stopped");
    emitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::report::MemorySink;
    use crate::monitoring::testing::FakeProbe;
    use crate::monitoring::types::ProbeStatus;

    fn spec(probe: FakeProbe, interval_secs: u64) -> WorkerSpec {
        WorkerSpec {
            target: "10.0.0.5".to_string(),
            protocol: Protocol::Tcp,
            interval: Duration::from_secs(interval_secs),
            probe: Arc::new(probe),
            degraded_threshold_ms: 1000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_worker() {
        let sink = Arc::new(MemorySink::default());
        let cancel = CancelSignal::new();
        let active = Arc::new(AtomicUsize::new(0));

        let guard = ActiveGuard::enter(&active);
        let handle = tokio::spawn(run(spec(FakeProbe::failing(), 1), sink.clone(), cancel.clone(), guard));
        sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        let emitted = handle.await.unwrap();

        assert_eq!(emitted, 4);
        assert_eq!(sink.len(), 4);
        assert!(sink.blocks().iter().all(|b| b.lines.last().is_some_and(|l| l == "Result: down")));
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_probe() {
        let sink = Arc::new(MemorySink::default());
        let cancel = CancelSignal::new();
        let active = Arc::new(AtomicUsize::new(0));
        let probe = FakeProbe::new(Duration::ZERO);
        let calls = probe.calls.clone();

        cancel.cancel();
        let emitted = run(spec(probe, 1), sink.clone(), cancel, ActiveGuard::enter(&active)).await;

        assert_eq!(emitted, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_success_is_degraded() {
        let sink = Arc::new(MemorySink::default());
        let cancel = CancelSignal::new();
        let active = Arc::new(AtomicUsize::new(0));
        let probe = FakeProbe { latency_ms: 2500, ..FakeProbe::new(Duration::ZERO) };

        let guard = ActiveGuard::enter(&active);
        let handle = tokio::spawn(run(spec(probe, 60), sink.clone(), cancel.clone(), guard));
        sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        handle.await.unwrap();

        let blocks = sink.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lines.last().unwrap(), &format!("Result: {} (2500 ms)", ProbeStatus::Degraded));
    }
}
