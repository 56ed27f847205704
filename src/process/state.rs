//! Lifecycle states and exit statuses of supervised children.

use std::fmt;

/// Which child of the unit a ManagedProcess stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Daemon,
    Application,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Daemon => "daemon",
            Role::Application => "application",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-process lifecycle state.
///
/// `PENDING -> STARTING -> READY_WAIT (daemon only) -> RUNNING -> {EXITED_CLEAN, EXITED_FAILED, KILLED}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Pending,
    Starting,
    ReadyWait,
    Running,
    ExitedClean,
    ExitedFailed,
    Killed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Pending => "pending",
            ProcessState::Starting => "starting",
            ProcessState::ReadyWait => "ready_wait",
            ProcessState::Running => "running",
            ProcessState::ExitedClean => "exited_clean",
            ProcessState::ExitedFailed => "exited_failed",
            ProcessState::Killed => "killed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::ExitedClean | ProcessState::ExitedFailed | ProcessState::Killed
        )
    }

    /// Reports whether `self -> next` is a legal move for a process of `role`.
    pub fn can_transition_to(self, next: ProcessState, role: Role) -> bool {
        use ProcessState::*;

        match (self, next) {
            (_, Killed) => true,
            (Pending, Starting) => true,
            (Starting, ReadyWait) => role == Role::Daemon,
            (Starting, Running) => role == Role::Application,
            (ReadyWait, Running) => role == Role::Daemon,
            (ReadyWait, ExitedFailed) => true,
            (Starting | Running, ExitedClean | ExitedFailed) => true,
            // a fresh attempt after a failure or a forced stop
            (ExitedFailed | Killed, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signalled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Status for a child whose exit could not be collected.
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[cfg(unix)]
impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown status"),
        }
    }
}
