//! Scenario tests for the unit supervisor.
//!
//! Every case drives a real [`crate::supervisor::Supervisor`] over fake
//! children on paused time, except `cases_process_test` which runs real
//! `/bin/sh` children.


pub mod support;
