// Events reported into the Supervisor's single decision point.

use crate::process::{ExitStatus, Role};
use crate::readiness::{Ready, ReadinessError};

#[derive(Debug)]
pub enum Event {
    /// An observer reaped a child.
    Exited {
        role: Role,
        generation: u64,
        status: ExitStatus,
    },
    /// The readiness gate for a daemon generation finished.
    Readiness {
        generation: u64,
        result: Result<Ready, ReadinessError>,
    },
}
