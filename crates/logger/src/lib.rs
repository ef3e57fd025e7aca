//! Process-wide diagnostics setup shared by the workspace binaries.

mod tracing;

pub use self::tracing::{init_tracing, level_from_verbosity};
