// Terminal result of the supervised unit.

use std::fmt;
use std::time::Duration;

use crate::launcher::LaunchError;
use crate::process::{ExitStatus, Role};

/// A child died after reaching RUNNING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{role} exited after running: {status}")]
pub struct RuntimeExitError {
    pub role: Role,
    pub generation: u64,
    pub status: ExitStatus,
}

/// How the unit ended. The unit never succeeds on its own; every variant
/// except [`UnitOutcome::Shutdown`] is a failure.
#[derive(Debug)]
pub enum UnitOutcome {
    /// Shutdown was requested and both children confirmed termination.
    Shutdown,
    /// Shutdown was requested but a child did not confirm in time.
    ShutdownTimedOut,
    DaemonLaunchFailed(LaunchError),
    DaemonReadinessTimeout {
        waited: Duration,
        polls: u32,
        launches: u32,
    },
    DaemonDiedBeforeReady {
        status: ExitStatus,
    },
    DaemonLost(RuntimeExitError),
    ApplicationLaunchFailed(LaunchError),
    ApplicationRestartsExhausted {
        restarts: u32,
        last: RuntimeExitError,
    },
    /// The application exited with status zero.
    ApplicationStopped,
}

impl UnitOutcome {
    /// Process exit status of the unit.
    pub fn exit_code(&self) -> u8 {
        match self {
            UnitOutcome::Shutdown => 0,
            UnitOutcome::ShutdownTimedOut => 1,
            UnitOutcome::DaemonLaunchFailed(_) => 10,
            UnitOutcome::DaemonReadinessTimeout { .. } => 11,
            UnitOutcome::DaemonDiedBeforeReady { .. } => 12,
            UnitOutcome::DaemonLost(_) => 13,
            UnitOutcome::ApplicationLaunchFailed(_) => 20,
            UnitOutcome::ApplicationRestartsExhausted { .. } => 21,
            UnitOutcome::ApplicationStopped => 22,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }

    /// Short machine-friendly tag for logs.
    pub fn cause(&self) -> &'static str {
        match self {
            UnitOutcome::Shutdown => "shutdown",
            UnitOutcome::ShutdownTimedOut => "shutdown_timed_out",
            UnitOutcome::DaemonLaunchFailed(_) => "daemon_launch_failed",
            UnitOutcome::DaemonReadinessTimeout { .. } => "daemon_readiness_timeout",
            UnitOutcome::DaemonDiedBeforeReady { .. } => "daemon_died_before_ready",
            UnitOutcome::DaemonLost(_) => "daemon_lost",
            UnitOutcome::ApplicationLaunchFailed(_) => "application_launch_failed",
            UnitOutcome::ApplicationRestartsExhausted { .. } => "application_restarts_exhausted",
            UnitOutcome::ApplicationStopped => "application_stopped",
        }
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Shutdown => f.write_str("clean shutdown"),
            UnitOutcome::ShutdownTimedOut => {
                f.write_str("shutdown requested but children did not confirm termination in time")
            }
            UnitOutcome::DaemonLaunchFailed(e) => write!(f, "daemon launch failed: {}", e),
            UnitOutcome::DaemonReadinessTimeout {
                waited,
                polls,
                launches,
            } => write!(
                f,
                "daemon readiness timeout: not ready after {} ({} polls, {} launch(es))",
                humantime::format_duration(*waited),
                polls,
                launches
            ),
            UnitOutcome::DaemonDiedBeforeReady { status } => {
                write!(f, "daemon died before becoming ready ({})", status)
            }
            UnitOutcome::DaemonLost(e) => write!(f, "daemon dependency lost: {}", e),
            UnitOutcome::ApplicationLaunchFailed(e) => {
                write!(f, "application launch failed: {}", e)
            }
            UnitOutcome::ApplicationRestartsExhausted { restarts, last } => write!(
                f,
                "application repeatedly crashed: gave up after {} restart(s), last {}",
                restarts, last.status
            ),
            UnitOutcome::ApplicationStopped => f.write_str("application stopped with status 0"),
        }
    }
}
