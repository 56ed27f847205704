// Error definitions for launchers

use std::io;

/// Why a child could not be started. Launchers never retry; the
/// Supervisor decides what a launch failure means for the unit.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("executable {program:?} not found")]
    ExecutableNotFound { program: String },
    #[error("{name} port {port} is already bound")]
    PortInUse { name: &'static str, port: u16 },
    #[error("configuration rejected: {reason}")]
    BadConfiguration { reason: String },
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// Maps a spawn failure, singling out a missing executable.
    pub fn from_spawn(program: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            LaunchError::ExecutableNotFound {
                program: program.to_string(),
            }
        } else {
            LaunchError::Spawn {
                program: program.to_string(),
                source: err,
            }
        }
    }

    pub fn cause_tag(&self) -> &'static str {
        match self {
            LaunchError::ExecutableNotFound { .. } => "executable_not_found",
            LaunchError::PortInUse { .. } => "port_in_use",
            LaunchError::BadConfiguration { .. } => "bad_configuration",
            LaunchError::Spawn { .. } => "spawn_failed",
        }
    }
}
