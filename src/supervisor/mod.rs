//! Supervision of the unit: lifecycle state machine, restart policy and the
//! terminal outcome.

pub mod event;
pub mod observer;
pub mod outcome;
pub mod policy;
#[allow(clippy::module_inception)]
pub mod supervisor;


pub use event::Event;
pub use outcome::{RuntimeExitError, UnitOutcome};
pub use policy::{Backoff, Decision, RolePolicy, SupervisionPolicy};
pub use supervisor::Supervisor;
