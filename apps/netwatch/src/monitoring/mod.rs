/// Concurrent probe scheduler
///
/// This module is responsible for:
/// - Resolving protocol names to probes (registry)
/// - Running one periodic worker per (target, protocol) pair
/// - Serializing worker reports onto one console
/// - Starting and stopping whole monitoring sessions
pub mod cancel;
pub mod params;
pub mod probe;
pub mod registry;
pub mod report;
pub mod session;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::ProbeRegistry;
pub use report::{ConsoleSink, ReportBlock, ReportSink};
pub use session::{MonitorSession, SessionError, StopSummary, TargetSelection};
pub use types::Protocol;
