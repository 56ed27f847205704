// Shared test support code for the scenario tests.
// This module provides fakes and harness helpers that all test files can use.

pub mod common;
pub mod fake;
pub mod harness;

pub use common::*;
pub use fake::{DyingProbes, FakeSpawner, HangingProbe, Script, ScriptedProbes, SIGKILL, SIGTERM};
pub use harness::{free_ports, journal, start_unit, test_config, TestUnit};
