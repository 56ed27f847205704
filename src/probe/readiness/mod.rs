// Package readiness provides the dependency gate between daemon spawn and
// application start.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info};

pub mod check;
pub mod control;
pub mod error;
pub mod probe;


pub use check::{Predicate, ReadinessCheck};
pub use control::ControlProbe;
pub use error::ReadinessError;
pub use probe::{DefaultProbeFactory, OutputProbe, Probe, ProbeFactory, TcpProbe};

use crate::process::{ExitStatus, ExitWatch, ProcessWatch};

/// Positive readiness answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub polls: u32,
    pub waited: Duration,
}

/// Wait-with-timeout primitive over a [`Probe`]. It never retries beyond
/// its own poll loop.
pub struct Prober {
    factory: Arc<dyn ProbeFactory>,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DefaultProbeFactory))
    }

    pub fn with_factory(factory: Arc<dyn ProbeFactory>) -> Self {
        Self { factory }
    }

    /// Polls the check's target every `poll_interval` until a positive answer,
    /// `max_wait` elapses, or the watched process exits. Process death wins
    /// over the timeout no matter how much of the window is left.
    pub async fn await_ready(
        &self,
        check: &ReadinessCheck,
        watch: ProcessWatch,
    ) -> Result<Ready, ReadinessError> {
        let ProcessWatch { mut exit, output } = watch;
        let mut probe = self.factory.create(check, output);

        let started = Instant::now();
        let deadline = started + check.max_wait;
        let mut polls = 0u32;

        loop {
            if let Some(status) = *exit.borrow() {
                return Err(ReadinessError::ProcessDied { status, polls });
            }

            let poll_started = Instant::now();
            let budget = check
                .poll_interval
                .min(deadline.saturating_duration_since(poll_started));
            polls += 1;

            let answer = tokio::select! {
                answer = timeout(budget, probe.poll()) => answer,
                status = died(&mut exit) => {
                    return Err(ReadinessError::ProcessDied { status, polls });
                }
            };

            match answer {
                Ok(Ok(true)) => {
                    let ready = Ready {
                        polls,
                        waited: started.elapsed(),
                    };
                    info!(
                        component = "readiness",
                        event = "ready",
                        target = %check.target,
                        polls,
                        waited = ?ready.waited,
                        "dependency is ready"
                    );
                    return Ok(ready);
                }
                Ok(Ok(false)) => {
                    debug!(component = "readiness", event = "not_ready", polls, "target answered, not ready yet");
                }
                Ok(Err(e)) => {
                    debug!(component = "readiness", event = "poll_failed", polls, error = %e, "readiness poll failed");
                }
                Err(_) => {
                    debug!(component = "readiness", event = "poll_timeout", polls, "readiness poll timed out");
                }
            }

            let next_at = poll_started + check.poll_interval;
            let wake_at = next_at.min(deadline);
            tokio::select! {
                _ = sleep_until(wake_at) => {}
                status = died(&mut exit) => {
                    return Err(ReadinessError::ProcessDied { status, polls });
                }
            }

            if next_at >= deadline {
                return Err(ReadinessError::Timeout {
                    waited: started.elapsed(),
                    polls,
                });
            }
        }
    }
}

/// Resolves once the watched process has exited. Never resolves if the
/// observer went away without reporting.
async fn died(exit: &mut ExitWatch) -> ExitStatus {
    let observed = exit
        .wait_for(|s| s.is_some())
        .await
        .map(|status| (*status).unwrap_or_else(ExitStatus::unknown));
    match observed {
        Ok(status) => status,
        Err(_) => std::future::pending().await,
    }
}
