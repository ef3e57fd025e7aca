//! Monitor session lifecycle.
//!
//! A session is created from one configuration snapshot, spawns one worker
//! task per (target, protocol) pair and owns them until [`MonitorSession::stop`]
//! has joined every one of them.

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cancel::CancelSignal;
use super::params::ParamError;
use super::registry::ProbeRegistry;
use super::report::ReportSink;
use super::types::{Protocol, UnknownProtocol};
use super::worker::{self, ActiveGuard, WorkerSpec};
use crate::store::ConfigSnapshot;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{target}: {source}")]
    UnknownProtocol { target: String, source: UnknownProtocol },

    #[error("Server '{0}' is not configured")]
    UnknownTarget(String),

    #[error("Server '{target}' lists the {protocol} service more than once")]
    DuplicateService { target: String, protocol: Protocol },

    #[error("{target} {protocol}: {source}")]
    InvalidService { target: String, protocol: Protocol, source: ParamError },

    #[error("Monitor session was already stopped")]
    SessionAlreadyStopped,
}

/// Which targets of the snapshot to monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    One(String),
    All,
}

/// What a running worker is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub target: String,
    pub protocol: Protocol,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopSummary {
    pub workers_stopped: usize,
    pub panicked: usize,
    pub reports_emitted: u64,
}

pub struct MonitorSession {
    id: Uuid,
    cancel: CancelSignal,
    handles: Vec<JoinHandle<u64>>,
    workers: Vec<WorkerInfo>,
    active: Arc<AtomicUsize>,
    stopped: bool,
}

impl MonitorSession {
    /// Resolve and bind every selected pair without spawning anything
    ///
    /// The first pair that cannot be bound fails the whole plan, and so does
    /// a target naming one protocol under two spellings.
    pub fn plan(
        selection: &TargetSelection,
        snapshot: &ConfigSnapshot,
        registry: &ProbeRegistry,
    ) -> Result<Vec<WorkerSpec>, SessionError> {
        let selected: Vec<_> = match selection {
            TargetSelection::All => snapshot.iter().collect(),
            TargetSelection::One(target) => {
                let services = snapshot
                    .services(target)
                    .ok_or_else(|| SessionError::UnknownTarget(target.clone()))?;
                vec![(target.as_str(), services)]
            }
        };

        let degraded_threshold_ms = registry.defaults().degraded_threshold_ms;
        let mut specs = Vec::new();

        for (target, services) in selected {
            let mut seen = BTreeSet::new();
            for (name, service) in services {
                let probe_spec = registry.resolve(name).map_err(|source| SessionError::UnknownProtocol {
                    target: target.to_string(),
                    source,
                })?;
                if !seen.insert(probe_spec.protocol) {
                    return Err(SessionError::DuplicateService {
                        target: target.to_string(),
                        protocol: probe_spec.protocol,
                    });
                }
                let probe = probe_spec.bind(service, registry.defaults()).map_err(|source| {
                    SessionError::InvalidService { target: target.to_string(), protocol: probe_spec.protocol, source }
                })?;

                specs.push(WorkerSpec {
                    target: target.to_string(),
                    protocol: probe.protocol(),
                    interval: Duration::from_secs(service.interval),
                    probe,
                    degraded_threshold_ms,
                });
            }
        }

        Ok(specs)
    }

    /// Plan the selection, then start one worker per pair
    pub fn start(
        selection: &TargetSelection,
        snapshot: &ConfigSnapshot,
        registry: &ProbeRegistry,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self, SessionError> {
        let specs = Self::plan(selection, snapshot, registry)?;
        Ok(Self::spawn(specs, sink))
    }

    /// Start workers for already bound pairs, all sharing `sink`
    pub fn spawn(specs: Vec<WorkerSpec>, sink: Arc<dyn ReportSink>) -> Self {
        let id = Uuid::new_v4();
        let cancel = CancelSignal::new();
        let active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(specs.len());
        let mut workers = Vec::with_capacity(specs.len());
        for spec in specs {
            workers.push(WorkerInfo { target: spec.target.clone(), protocol: spec.protocol, interval: spec.interval });
            // Counted before the task exists so a fresh session never reads as idle
            let guard = ActiveGuard::enter(&active);
            handles.push(tokio::spawn(worker::run(spec, sink.clone(), cancel.clone(), guard)));
        }

        info!(session = %id, workers = workers.len(), "monitor session started");
        Self { id, cancel, handles, workers, active, stopped: false }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workers(&self) -> &[WorkerInfo] {
        &self.workers
    }

    /// Workers whose loop has not exited yet
    pub fn active_worker_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Cancel every worker and wait until all of them have exited
    ///
    /// A probe already in flight finishes first, so this takes at most the
    /// longest probe timeout of the session. Stopping twice is an error.
    pub async fn stop(&mut self) -> Result<StopSummary, SessionError> {
        if self.stopped {
            return Err(SessionError::SessionAlreadyStopped);
        }
        self.stopped = true;

        debug!(session = %self.id, "cancelling workers");
        self.cancel.cancel();

        let mut summary = StopSummary::default();
        for (joined, info) in join_all(self.handles.drain(..)).await.into_iter().zip(&self.workers) {
            match joined {
                Ok(emitted) => summary.reports_emitted += emitted,
                Err(e) if e.is_panic() => {
                    error!(session = %self.id, server = %info.target, protocol = %info.protocol, "worker panicked");
                    summary.panicked += 1;
                }
                Err(e) => warn!(session = %self.id, server = %info.target, "worker did not finish: {}", e),
            }
            summary.workers_stopped += 1;
        }

        info!(
            session = %self.id,
            workers = summary.workers_stopped,
            panicked = summary.panicked,
            reports = summary.reports_emitted,
            "monitor session stopped"
        );
        Ok(summary)
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        if !self.stopped {
            warn!(session = %self.id, "monitor session dropped without stop, cancelling workers");
            self.cancel.cancel();
        }
    }
}
