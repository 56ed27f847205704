//! Child processes: lifecycle states, spawning, and the per-child model the
//! Supervisor keeps.

pub mod managed;
pub mod spawner;
pub mod state;

#[cfg(test)]
mod managed_test;

pub use managed::{Attached, ExitWatch, ManagedProcess, ProcessWatch};
pub use spawner::{CommandSpawner, LaunchSpec, OutputLine, Signaller, Spawned, Spawner, Stream, Waiter};
pub use state::{ExitStatus, ProcessState, Role};
