//! Launchers for the two children of the unit.

pub mod application;
pub mod daemon;
pub mod error;
pub mod ports;


pub use application::ApplicationLauncher;
pub use daemon::DaemonLauncher;
pub use error::LaunchError;

use crate::process::{LaunchSpec, Spawned};

/// A successful launch: what was run and the live child.
pub struct Launch {
    pub spec: LaunchSpec,
    pub spawned: Spawned,
}
