// Restart policy and backoff.

use std::time::Duration;

use crate::config::{Config, ConfigTrait};

/// Doubling delay with a ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        let base = base.min(ceiling);
        Self {
            base,
            ceiling,
            next: base,
        }
    }

    /// Returns the delay to use now and doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = current
            .checked_mul(2)
            .unwrap_or(self.ceiling)
            .min(self.ceiling);
        current
    }

    /// Delay the next call to [`Backoff::next_delay`] will return.
    pub fn peek(&self) -> Duration {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

/// Restart rules for the application. Daemon loss never gets one: it
/// always takes the whole unit down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    pub max_restarts: u32,
    pub backoff_base: Duration,
    pub backoff_ceiling: Duration,
    /// Uptime after which past crashes are forgotten.
    pub reset_after: Duration,
}

impl RolePolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_ceiling)
    }

    /// Decides on a failure given how many restarts already happened.
    pub fn decide(&self, restarts: u32, backoff: &mut Backoff) -> Decision {
        if restarts >= self.max_restarts {
            return Decision::Exhausted { restarts };
        }
        Decision::Restart {
            attempt: restarts + 1,
            delay: backoff.next_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Restart { attempt: u32, delay: Duration },
    Exhausted { restarts: u32 },
}

/// Unit-wide supervision settings, fixed at startup. Only the application
/// is restarted; a daemon exit after readiness is always fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisionPolicy {
    pub application: RolePolicy,
    /// Fresh daemon launches allowed after a readiness timeout.
    pub readiness_retries: u32,
    /// Start the application only once the daemon is RUNNING.
    pub gated: bool,
    /// Per-process wait between SIGTERM and SIGKILL.
    pub grace_period: Duration,
    /// Upper bound for tearing the whole unit down.
    pub shutdown_timeout: Duration,
}

impl SupervisionPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        let restart = cfg.restart();
        Self {
            application: RolePolicy {
                max_restarts: restart.max_restarts,
                backoff_base: restart.backoff_base,
                backoff_ceiling: restart.backoff_ceiling,
                reset_after: restart.reset_after,
            },
            readiness_retries: cfg.readiness().retries,
            gated: cfg.app().gated,
            grace_period: cfg.shutdown().grace_period,
            shutdown_timeout: cfg.shutdown().timeout,
        }
    }
}
