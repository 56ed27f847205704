//! Unit supervisor: owns both children and is the only decision point for
//! restart versus fatal escalation.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event::Event;
use super::observer;
use super::outcome::{RuntimeExitError, UnitOutcome};
use super::policy::{Backoff, Decision, SupervisionPolicy};
use crate::config::{Config, ConfigTrait};
use crate::launcher::{ApplicationLauncher, DaemonLauncher, Launch, LaunchError};
use crate::process::{ExitStatus, ManagedProcess, ProcessState, Role, Spawner};
use crate::readiness::{Prober, Ready, ReadinessCheck, ReadinessError};
use crate::shutdown::GracefulShutdown;

const EVENTS_BUFFER: usize = 32;

enum Step {
    Shutdown,
    Event(Event),
    RestartApplication,
}

/// The single running unit with its two children.
pub struct Supervisor {
    policy: SupervisionPolicy,
    daemon_launcher: DaemonLauncher,
    app_launcher: ApplicationLauncher,
    prober: Arc<Prober>,
    check: Arc<ReadinessCheck>,
    daemon: ManagedProcess,
    app: ManagedProcess,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    readiness_task: Option<JoinHandle<()>>,
    daemon_launches: u32,
    readiness_polls: u32,
    readiness_waited: Duration,
    graceful: GracefulShutdown,
}

impl Supervisor {
    /// Builds the supervisor from validated configuration. Nothing is
    /// started until [`Supervisor::run`].
    pub fn new(
        cfg: &Config,
        spawner: Arc<dyn Spawner>,
        prober: Prober,
        shutdown_token: CancellationToken,
    ) -> Result<Self> {
        let policy = SupervisionPolicy::from_config(cfg);
        let check = ReadinessCheck::from_config(cfg).context("invalid readiness pattern")?;

        let daemon_launcher = DaemonLauncher::new(cfg.daemon().clone(), spawner.clone());
        let app_launcher = ApplicationLauncher::new(
            cfg.app().clone(),
            cfg.daemon().proxy_port,
            cfg.daemon().control_port,
            spawner,
        );

        let (events_tx, events_rx) = mpsc::channel(EVENTS_BUFFER);
        let graceful = GracefulShutdown::new(shutdown_token, policy.shutdown_timeout);

        Ok(Self {
            // relaunched only after a readiness timeout, without delay
            daemon: ManagedProcess::new(Role::Daemon, Backoff::new(Duration::ZERO, Duration::ZERO)),
            app: ManagedProcess::new(Role::Application, policy.application.backoff()),
            policy,
            daemon_launcher,
            app_launcher,
            prober: Arc::new(prober),
            check: Arc::new(check),
            events_tx,
            events_rx,
            readiness_task: None,
            daemon_launches: 0,
            readiness_polls: 0,
            readiness_waited: Duration::ZERO,
            graceful,
        })
    }

    /// Runs the unit until it reaches an outcome, then tears both children
    /// down (application first) and returns it.
    pub async fn run(mut self) -> UnitOutcome {
        let token = self.graceful.token();

        info!(
            component = "supervisor",
            event = "starting",
            gated = self.policy.gated,
            max_restarts = self.policy.application.max_restarts,
            "supervisor starting"
        );

        if token.is_cancelled() {
            return self.finish(UnitOutcome::Shutdown).await;
        }
        if let Some(outcome) = self.start_daemon().await {
            return self.finish(outcome).await;
        }
        if !self.policy.gated {
            if let Some(outcome) = self.start_application().await {
                return self.finish(outcome).await;
            }
        }

        loop {
            let restart_at = self.app.restart_at();
            let step = tokio::select! {
                biased;
                _ = token.cancelled() => Step::Shutdown,
                Some(event) = self.events_rx.recv() => Step::Event(event),
                _ = sleep_until_some(restart_at) => Step::RestartApplication,
            };

            let outcome = match step {
                Step::Shutdown => {
                    info!(
                        component = "supervisor",
                        event = "shutdown_requested",
                        "shutdown requested"
                    );
                    Some(UnitOutcome::Shutdown)
                }
                Step::Event(event) => self.handle(event).await,
                Step::RestartApplication => {
                    self.app.clear_restart();
                    self.start_application().await
                }
            };

            if let Some(outcome) = outcome {
                return self.finish(outcome).await;
            }
        }
    }

    async fn handle(&mut self, event: Event) -> Option<UnitOutcome> {
        match event {
            Event::Exited {
                role: Role::Daemon,
                generation,
                status,
            } => self.on_daemon_exit(generation, status),
            Event::Exited {
                role: Role::Application,
                generation,
                status,
            } => self.on_application_exit(generation, status),
            Event::Readiness { generation, result } => self.on_readiness(generation, result).await,
        }
    }

    fn is_stale(process: &ManagedProcess, generation: u64) -> bool {
        if generation == process.generation() {
            return false;
        }
        debug!(
            component = "supervisor",
            event = "stale_event",
            role = process.role().as_str(),
            generation,
            current = process.generation(),
            "ignoring event from a previous instance"
        );
        true
    }

    fn on_daemon_exit(&mut self, generation: u64, status: ExitStatus) -> Option<UnitOutcome> {
        if Self::is_stale(&self.daemon, generation) {
            return None;
        }
        self.daemon.record_exit(status);

        match self.daemon.state() {
            // settled by the readiness result, even a ready answer racing the exit
            ProcessState::ReadyWait => None,
            ProcessState::Starting | ProcessState::Running => {
                let next = if status.success() {
                    ProcessState::ExitedClean
                } else {
                    ProcessState::ExitedFailed
                };
                self.daemon.transition(next);
                error!(
                    component = "supervisor",
                    event = "daemon_lost",
                    generation,
                    status = %status,
                    "daemon exited while running"
                );
                Some(UnitOutcome::DaemonLost(RuntimeExitError {
                    role: Role::Daemon,
                    generation,
                    status,
                }))
            }
            _ => None,
        }
    }

    fn on_application_exit(&mut self, generation: u64, status: ExitStatus) -> Option<UnitOutcome> {
        if Self::is_stale(&self.app, generation) {
            return None;
        }
        self.app.record_exit(status);

        if !matches!(
            self.app.state(),
            ProcessState::Starting | ProcessState::Running
        ) {
            return None;
        }

        if status.success() {
            self.app.transition(ProcessState::ExitedClean);
            info!(
                component = "supervisor",
                event = "application_stopped",
                generation,
                "application exited with status 0, not restarting"
            );
            return Some(UnitOutcome::ApplicationStopped);
        }

        self.app.transition(ProcessState::ExitedFailed);
        let last = RuntimeExitError {
            role: Role::Application,
            generation,
            status,
        };

        let uptime = self.app.uptime();
        if uptime >= self.policy.application.reset_after {
            debug!(
                component = "supervisor",
                event = "backoff_reset",
                uptime = ?uptime,
                "application ran long enough, forgetting earlier crashes"
            );
            self.app.reset_restarts();
        }

        match self
            .policy
            .application
            .decide(self.app.restarts(), self.app.backoff_mut())
        {
            Decision::Restart { attempt, delay } => {
                warn!(
                    component = "supervisor",
                    event = "application_crashed",
                    generation,
                    status = %status,
                    attempt,
                    max_restarts = self.policy.application.max_restarts,
                    delay = ?delay,
                    "application crashed, restart scheduled"
                );
                self.app.schedule_restart(delay);
                None
            }
            Decision::Exhausted { restarts } => {
                error!(
                    component = "supervisor",
                    event = "restarts_exhausted",
                    generation,
                    status = %status,
                    restarts,
                    "application crashed, no restarts left"
                );
                Some(UnitOutcome::ApplicationRestartsExhausted { restarts, last })
            }
        }
    }

    async fn on_readiness(
        &mut self,
        generation: u64,
        result: Result<Ready, ReadinessError>,
    ) -> Option<UnitOutcome> {
        if Self::is_stale(&self.daemon, generation) {
            return None;
        }
        self.readiness_task = None;

        match result {
            Ok(ready) => {
                self.readiness_polls += ready.polls;
                // the exit may have been reported while the last poll was in flight
                if let Some(status) = self.daemon.exit_status() {
                    self.daemon.transition(ProcessState::ExitedFailed);
                    error!(
                        component = "supervisor",
                        event = "daemon_died_before_ready",
                        generation,
                        status = %status,
                        "daemon answered ready but has already exited"
                    );
                    return Some(UnitOutcome::DaemonDiedBeforeReady { status });
                }
                self.daemon.transition(ProcessState::Running);
                info!(
                    component = "supervisor",
                    event = "daemon_running",
                    generation,
                    pid = ?self.daemon.pid(),
                    polls = ready.polls,
                    "daemon is ready"
                );
                if self.policy.gated && self.app.generation() == 0 {
                    return self.start_application().await;
                }
                None
            }
            Err(ReadinessError::Timeout { waited, polls }) => {
                self.readiness_polls += polls;
                self.readiness_waited += waited;
                self.daemon.transition(ProcessState::ExitedFailed);

                if self.daemon_launches <= self.policy.readiness_retries {
                    warn!(
                        component = "supervisor",
                        event = "readiness_timeout",
                        generation,
                        launches = self.daemon_launches,
                        retries = self.policy.readiness_retries,
                        "daemon not ready in time, relaunching"
                    );
                    self.stop(Role::Daemon).await;
                    return self.start_daemon().await;
                }

                error!(
                    component = "supervisor",
                    event = "readiness_timeout",
                    generation,
                    launches = self.daemon_launches,
                    polls = self.readiness_polls,
                    "daemon never became ready"
                );
                Some(UnitOutcome::DaemonReadinessTimeout {
                    waited: self.readiness_waited,
                    polls: self.readiness_polls,
                    launches: self.daemon_launches,
                })
            }
            Err(ReadinessError::ProcessDied { status, polls }) => {
                self.readiness_polls += polls;
                self.daemon.transition(ProcessState::ExitedFailed);
                error!(
                    component = "supervisor",
                    event = "daemon_died_before_ready",
                    generation,
                    status = %status,
                    "daemon died before becoming ready"
                );
                Some(UnitOutcome::DaemonDiedBeforeReady { status })
            }
        }
    }

    async fn start_daemon(&mut self) -> Option<UnitOutcome> {
        self.daemon.transition(ProcessState::Pending);
        self.daemon.transition(ProcessState::Starting);
        self.daemon_launches += 1;

        let launch = match self.daemon_launcher.start().await {
            Ok(launch) => launch,
            Err(e) => {
                self.daemon.transition(ProcessState::ExitedFailed);
                error!(
                    component = "supervisor",
                    event = "launch_failed",
                    role = "daemon",
                    cause = e.cause_tag(),
                    error = %e,
                    "daemon launch failed"
                );
                return Some(UnitOutcome::DaemonLaunchFailed(e));
            }
        };

        if let Err(e) = self.adopt(Role::Daemon, launch) {
            return Some(UnitOutcome::DaemonLaunchFailed(e));
        }
        self.daemon.transition(ProcessState::ReadyWait);

        let Some(watch) = self.daemon.watch() else {
            return Some(UnitOutcome::DaemonLaunchFailed(LaunchError::BadConfiguration {
                reason: "daemon handle is missing after launch".to_string(),
            }));
        };
        let prober = self.prober.clone();
        let check = self.check.clone();
        let tx = self.events_tx.clone();
        let generation = self.daemon.generation();
        self.readiness_task = Some(tokio::task::spawn(async move {
            let result = prober.await_ready(&check, watch).await;
            let _ = tx.send(Event::Readiness { generation, result }).await;
        }));

        None
    }

    async fn start_application(&mut self) -> Option<UnitOutcome> {
        self.app.transition(ProcessState::Starting);

        let launch = match self.app_launcher.start().await {
            Ok(launch) => launch,
            Err(e) => {
                self.app.transition(ProcessState::ExitedFailed);
                error!(
                    component = "supervisor",
                    event = "launch_failed",
                    role = "application",
                    cause = e.cause_tag(),
                    error = %e,
                    "application launch failed"
                );
                return Some(UnitOutcome::ApplicationLaunchFailed(e));
            }
        };

        if let Err(e) = self.adopt(Role::Application, launch) {
            return Some(UnitOutcome::ApplicationLaunchFailed(e));
        }
        self.app.transition(ProcessState::Running);
        None
    }

    /// Attaches a launched child to its ManagedProcess and starts its observer.
    fn adopt(&mut self, role: Role, launch: Launch) -> Result<(), LaunchError> {
        let events = self.events_tx.clone();
        let process = self.process_mut(role);
        let program = launch.spec.program.clone();

        match process.attach(launch.spec, launch.spawned) {
            Ok(attached) => {
                observer::spawn(attached, events);
                Ok(())
            }
            Err(e) => {
                process.transition(ProcessState::ExitedFailed);
                error!(
                    component = "supervisor",
                    event = "attach_failed",
                    role = role.as_str(),
                    error = %e,
                    "refusing second live process"
                );
                Err(LaunchError::Spawn { program, source: e })
            }
        }
    }

    fn process_mut(&mut self, role: Role) -> &mut ManagedProcess {
        match role {
            Role::Daemon => &mut self.daemon,
            Role::Application => &mut self.app,
        }
    }

    /// SIGTERM, wait out the grace period, then SIGKILL.
    async fn stop(&mut self, role: Role) {
        let grace = self.policy.grace_period;
        let process = self.process_mut(role);
        if !process.is_alive() {
            return;
        }

        process.transition(ProcessState::Killed);
        info!(
            component = "supervisor",
            event = "terminating",
            role = role.as_str(),
            pid = ?process.pid(),
            grace = ?grace,
            "sending termination signal"
        );
        if let Err(e) = process.signal_terminate() {
            warn!(component = "supervisor", event = "signal_failed", role = role.as_str(), error = %e, "SIGTERM failed");
        }
        if let Some(status) = process.wait_exit(grace).await {
            process.record_exit(status);
            return;
        }

        warn!(
            component = "supervisor",
            event = "escalating",
            role = role.as_str(),
            pid = ?process.pid(),
            "child ignored termination signal, killing"
        );
        if let Err(e) = process.signal_kill() {
            warn!(component = "supervisor", event = "signal_failed", role = role.as_str(), error = %e, "SIGKILL failed");
        }
        match process.wait_exit(grace).await {
            Some(status) => process.record_exit(status),
            None => error!(
                component = "supervisor",
                event = "termination_unconfirmed",
                role = role.as_str(),
                pid = ?process.pid(),
                "child did not confirm termination"
            ),
        }
    }

    async fn finish(mut self, outcome: UnitOutcome) -> UnitOutcome {
        if let Some(task) = self.readiness_task.take() {
            task.abort();
        }

        info!(
            component = "supervisor",
            event = "teardown",
            cause = outcome.cause(),
            "stopping children"
        );

        let graceful = self.graceful.clone();
        let teardown = async {
            self.stop(Role::Application).await;
            self.stop(Role::Daemon).await;
        };

        match graceful.bounded(teardown).await {
            Ok(()) => outcome,
            Err(_) if matches!(outcome, UnitOutcome::Shutdown) => UnitOutcome::ShutdownTimedOut,
            Err(_) => outcome,
        }
    }
}

async fn sleep_until_some(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
