#[path = "probe/readiness/mod.rs"]
pub mod readiness;
#[cfg(test)]
mod tests;

#[cfg(test)]
pub use tests::support;

pub mod config;
pub mod launcher;
pub mod process;
pub mod shutdown;
pub mod supervisor;
