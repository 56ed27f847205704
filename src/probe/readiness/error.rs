// Error definitions for readiness probe

use std::time::Duration;

use crate::process::ExitStatus;

/// Why the readiness gate did not open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReadinessError {
    #[error("not ready after {waited:?} ({polls} polls)")]
    Timeout { waited: Duration, polls: u32 },
    #[error("process died before becoming ready ({status}) after {polls} polls")]
    ProcessDied { status: ExitStatus, polls: u32 },
}
