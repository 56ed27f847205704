// Fake children and scripted readiness probes.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::common::{record, Journal};
use crate::process::{ExitStatus, LaunchSpec, OutputLine, Role, Signaller, Spawned, Spawner, Waiter};
use crate::readiness::{Probe, ProbeFactory, ReadinessCheck};

pub const SIGTERM: i32 = 15;
pub const SIGKILL: i32 = 9;

/// How a fake child behaves.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Runs until signalled.
    Run,
    /// Exits on its own after the delay.
    ExitAfter(Duration, ExitStatus),
    /// Ignores SIGTERM, dies on SIGKILL.
    IgnoreTerm,
    /// Ignores every signal.
    Unkillable,
    /// Spawning fails.
    FailSpawn(io::ErrorKind),
}

/// [`Spawner`] producing fake children. Every spawn and signal is written
/// to the journal as `"spawn <role>"`, `"terminate <role>"`, `"kill <role>"`.
pub struct FakeSpawner {
    journal: Journal,
    queued: Mutex<HashMap<Role, VecDeque<Script>>>,
    defaults: Mutex<HashMap<Role, Script>>,
    spawns: Mutex<Vec<(Role, Instant, LaunchSpec)>>,
    exits: Mutex<HashMap<Role, mpsc::UnboundedSender<ExitStatus>>>,
    next_pid: AtomicU32,
}

impl FakeSpawner {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            queued: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            spawns: Mutex::new(Vec::new()),
            exits: Mutex::new(HashMap::new()),
            next_pid: AtomicU32::new(1000),
        })
    }

    /// Queues the script for the next spawn of `role`.
    pub fn script(&self, role: Role, script: Script) {
        self.queued
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(script);
    }

    /// Script used once the queue for `role` is empty.
    pub fn default_script(&self, role: Role, script: Script) {
        self.defaults.lock().unwrap().insert(role, script);
    }

    pub fn spawn_count(&self, role: Role) -> usize {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _, _)| *r == role)
            .count()
    }

    pub fn spawn_times(&self, role: Role) -> Vec<Instant> {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _, _)| *r == role)
            .map(|(_, at, _)| *at)
            .collect()
    }

    pub fn specs(&self, role: Role) -> Vec<LaunchSpec> {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _, _)| *r == role)
            .map(|(_, _, spec)| spec.clone())
            .collect()
    }

    /// Makes the latest child of `role` exit with `status`.
    pub fn exit(&self, role: Role, status: ExitStatus) {
        if let Some(tx) = self.exits.lock().unwrap().get(&role) {
            let _ = tx.send(status);
        }
    }

    fn next_script(&self, role: Role) -> Script {
        if let Some(script) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&role)
            .and_then(|q| q.pop_front())
        {
            return script;
        }
        self.defaults
            .lock()
            .unwrap()
            .get(&role)
            .copied()
            .unwrap_or(Script::Run)
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, role: Role, spec: &LaunchSpec) -> io::Result<Spawned> {
        let script = self.next_script(role);
        if let Script::FailSpawn(kind) = script {
            record(&self.journal, format!("spawn-failed {}", role));
            return Err(io::Error::from(kind));
        }

        record(&self.journal, format!("spawn {}", role));
        self.spawns
            .lock()
            .unwrap()
            .push((role, Instant::now(), spec.clone()));

        let (tx, rx) = mpsc::unbounded_channel();
        self.exits.lock().unwrap().insert(role, tx.clone());
        let (_output_tx, output) = mpsc::channel::<OutputLine>(1);

        Ok(Spawned {
            pid: Some(self.next_pid.fetch_add(1, Ordering::Relaxed)),
            waiter: Box::new(FakeWaiter { rx, script }),
            signaller: Arc::new(FakeSignaller {
                role,
                journal: self.journal.clone(),
                tx,
                script,
            }),
            output,
        })
    }
}

struct FakeWaiter {
    rx: mpsc::UnboundedReceiver<ExitStatus>,
    script: Script,
}

#[async_trait]
impl Waiter for FakeWaiter {
    async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Script::ExitAfter(delay, status) = self.script {
            if delay.is_zero() {
                return Ok(status);
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => return Ok(status),
                Some(status) = self.rx.recv() => return Ok(status),
            }
        }
        self.rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "fake child vanished"))
    }
}

struct FakeSignaller {
    role: Role,
    journal: Journal,
    tx: mpsc::UnboundedSender<ExitStatus>,
    script: Script,
}

impl Signaller for FakeSignaller {
    fn terminate(&self) -> io::Result<()> {
        record(&self.journal, format!("terminate {}", self.role));
        match self.script {
            Script::IgnoreTerm | Script::Unkillable => Ok(()),
            _ => {
                let _ = self.tx.send(ExitStatus::signalled(SIGTERM));
                Ok(())
            }
        }
    }

    fn kill(&self) -> io::Result<()> {
        record(&self.journal, format!("kill {}", self.role));
        match self.script {
            Script::Unkillable => Ok(()),
            _ => {
                let _ = self.tx.send(ExitStatus::signalled(SIGKILL));
                Ok(())
            }
        }
    }
}

/// [`ProbeFactory`] whose probes answer positively from the n-th poll on
/// (counted across all probes it made), or never. Records `"daemon ready"`.
pub struct ScriptedProbes {
    ready_after: Option<u32>,
    polls: Arc<AtomicU32>,
    journal: Journal,
}

impl ScriptedProbes {
    pub fn ready_after(polls: u32, journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            ready_after: Some(polls),
            polls: Arc::new(AtomicU32::new(0)),
            journal,
        })
    }

    pub fn never(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            ready_after: None,
            polls: Arc::new(AtomicU32::new(0)),
            journal,
        })
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

impl ProbeFactory for ScriptedProbes {
    fn create(
        &self,
        _check: &ReadinessCheck,
        _output: Option<mpsc::Receiver<OutputLine>>,
    ) -> Box<dyn Probe> {
        Box::new(ScriptedProbe {
            ready_after: self.ready_after,
            polls: self.polls.clone(),
            journal: self.journal.clone(),
        })
    }
}

struct ScriptedProbe {
    ready_after: Option<u32>,
    polls: Arc<AtomicU32>,
    journal: Journal,
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn poll(&mut self) -> Result<bool> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.ready_after {
            Some(k) if n >= k => {
                record(&self.journal, "daemon ready");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Probes that kill the bound daemon and then answer ready in the same
/// poll, so the exit and the ready answer reach the supervisor together.
pub struct DyingProbes {
    spawner: Mutex<Option<Arc<FakeSpawner>>>,
    journal: Journal,
}

impl DyingProbes {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            spawner: Mutex::new(None),
            journal,
        })
    }

    /// Must be called before the supervisor task first runs.
    pub fn bind(&self, spawner: Arc<FakeSpawner>) {
        *self.spawner.lock().unwrap() = Some(spawner);
    }
}

impl ProbeFactory for DyingProbes {
    fn create(
        &self,
        _check: &ReadinessCheck,
        _output: Option<mpsc::Receiver<OutputLine>>,
    ) -> Box<dyn Probe> {
        Box::new(DyingProbe {
            spawner: self.spawner.lock().unwrap().clone(),
            journal: self.journal.clone(),
        })
    }
}

struct DyingProbe {
    spawner: Option<Arc<FakeSpawner>>,
    journal: Journal,
}

#[async_trait]
impl Probe for DyingProbe {
    async fn poll(&mut self) -> Result<bool> {
        if let Some(spawner) = &self.spawner {
            spawner.exit(Role::Daemon, ExitStatus::exited(1));
        }
        tokio::task::yield_now().await;
        record(&self.journal, "daemon ready");
        Ok(true)
    }
}

/// Probe that never answers within any budget.
pub struct HangingProbe;

#[async_trait]
impl Probe for HangingProbe {
    async fn poll(&mut self) -> Result<bool> {
        std::future::pending::<()>().await;
        Ok(false)
    }
}
