//! The Supervisor's model of one child process.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::spawner::{LaunchSpec, OutputLine, Signaller, Spawned, Waiter};
use super::state::{ExitStatus, ProcessState, Role};
use crate::supervisor::Backoff;

/// Exit notifications of the live child, shared with whoever waits on it.
pub type ExitWatch = watch::Receiver<Option<ExitStatus>>;

struct Handle {
    pid: Option<u32>,
    signaller: Arc<dyn Signaller>,
    exit: ExitWatch,
}

/// Everything an observer task needs to reap the child just attached.
pub struct Attached {
    pub role: Role,
    pub generation: u64,
    pub waiter: Box<dyn Waiter>,
    pub exit_tx: watch::Sender<Option<ExitStatus>>,
}

/// What the readiness prober gets to look at while the daemon boots.
pub struct ProcessWatch {
    pub exit: ExitWatch,
    pub output: Option<mpsc::Receiver<OutputLine>>,
}

/// One supervised child. Holds at most one live OS handle at a time; a new
/// one can only be attached after the previous child has been reaped.
pub struct ManagedProcess {
    role: Role,
    spec: Option<LaunchSpec>,
    state: ProcessState,
    generation: u64,
    handle: Option<Handle>,
    output: Option<mpsc::Receiver<OutputLine>>,
    last_exit: Option<ExitStatus>,
    restarts: u32,
    restart_at: Option<Instant>,
    started_at: Option<Instant>,
    backoff: Backoff,
}

impl ManagedProcess {
    pub fn new(role: Role, backoff: Backoff) -> Self {
        Self {
            role,
            spec: None,
            state: ProcessState::Pending,
            generation: 0,
            handle: None,
            output: None,
            last_exit: None,
            restarts: 0,
            restart_at: None,
            started_at: None,
            backoff,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn spec(&self) -> Option<&LaunchSpec> {
        self.spec.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.pid)
    }

    pub fn last_exit(&self) -> Option<ExitStatus> {
        self.last_exit
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn restart_at(&self) -> Option<Instant> {
        self.restart_at
    }

    pub fn backoff_mut(&mut self) -> &mut Backoff {
        &mut self.backoff
    }

    /// Moves to `next` if the lifecycle allows it. Illegal moves are logged
    /// and leave the state untouched.
    pub fn transition(&mut self, next: ProcessState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next, self.role) {
            warn!(
                component = "supervisor",
                event = "illegal_transition",
                role = self.role.as_str(),
                from = self.state.as_str(),
                to = next.as_str(),
                "refusing lifecycle transition"
            );
            return false;
        }
        debug!(
            component = "supervisor",
            event = "transition",
            role = self.role.as_str(),
            generation = self.generation,
            from = self.state.as_str(),
            to = next.as_str(),
            "lifecycle transition"
        );
        self.state = next;
        true
    }

    /// Takes ownership of a freshly spawned child and moves to STARTING.
    ///
    /// Fails if the previous child has not been reaped yet.
    pub fn attach(&mut self, spec: LaunchSpec, spawned: Spawned) -> io::Result<Attached> {
        if self.is_alive() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} still owns a live process", self.role.as_str()),
            ));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        self.generation += 1;
        self.spec = Some(spec);
        self.handle = Some(Handle {
            pid: spawned.pid,
            signaller: spawned.signaller,
            exit: exit_rx,
        });
        self.output = Some(spawned.output);
        self.started_at = Some(Instant::now());
        self.transition(ProcessState::Starting);

        Ok(Attached {
            role: self.role,
            generation: self.generation,
            waiter: spawned.waiter,
            exit_tx,
        })
    }

    /// Hands out the exit watch and the output stream of the current child.
    pub fn watch(&mut self) -> Option<ProcessWatch> {
        let exit = self.handle.as_ref()?.exit.clone();
        Some(ProcessWatch {
            exit,
            output: self.output.take(),
        })
    }

    /// True while a child is attached and its exit has not been observed.
    pub fn is_alive(&self) -> bool {
        self.handle.is_some() && self.exit_status().is_none()
    }

    /// Exit of the current child as published by its observer. Available
    /// before the matching exit event is handled.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.handle.as_ref().and_then(|h| *h.exit.borrow())
    }

    pub fn record_exit(&mut self, status: ExitStatus) {
        self.last_exit = Some(status);
        self.output = None;
    }

    /// Time the current child has been up.
    pub fn uptime(&self) -> Duration {
        self.started_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn schedule_restart(&mut self, delay: Duration) {
        self.restarts += 1;
        self.restart_at = Some(Instant::now() + delay);
        self.transition(ProcessState::Pending);
    }

    pub fn clear_restart(&mut self) {
        self.restart_at = None;
    }

    /// Forgets past crashes after a sustained healthy run.
    pub fn reset_restarts(&mut self) {
        self.restarts = 0;
        self.backoff.reset();
    }

    pub fn signal_terminate(&self) -> io::Result<()> {
        match &self.handle {
            Some(h) if self.is_alive() => h.signaller.terminate(),
            _ => Ok(()),
        }
    }

    pub fn signal_kill(&self) -> io::Result<()> {
        match &self.handle {
            Some(h) if self.is_alive() => h.signaller.kill(),
            _ => Ok(()),
        }
    }

    /// Waits up to `grace` for the current child to be reaped.
    pub async fn wait_exit(&self, grace: Duration) -> Option<ExitStatus> {
        let mut exit = self.handle.as_ref()?.exit.clone();
        let observed = tokio::time::timeout(grace, exit.wait_for(|s| s.is_some()))
            .await
            .ok()?
            .ok()?;
        *observed
    }
}
