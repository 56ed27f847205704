// Scenario test harness: builds a supervisor over fakes and runs it in a task.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::common::{new_journal, Journal};
use super::fake::FakeSpawner;
use crate::config::{self, Config, ReadinessMode};
use crate::readiness::{ProbeFactory, Prober};
use crate::supervisor::{Supervisor, UnitOutcome};

/// Returns `N` distinct loopback ports that were free a moment ago.
pub fn free_ports<const N: usize>() -> [u16; N] {
    let listeners: Vec<TcpListener> = (0..N)
        .map(|_| TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind ephemeral port"))
        .collect();
    let mut ports = [0u16; N];
    for (slot, listener) in ports.iter_mut().zip(&listeners) {
        *slot = listener.local_addr().expect("local addr").port();
    }
    ports
}

/// Test config with free ports and a private data dir.
///
/// Defaults: readiness 5s/1s, 3 restarts at 1s..8s, grace 2s, shutdown
/// timeout 10s.
pub fn test_config(data_dir: &TempDir) -> Config {
    let [app, proxy, control] = free_ports::<3>();
    let mut cfg = config::new_test_config();
    cfg.unit.app.port = app;
    cfg.unit.daemon.proxy_port = proxy;
    cfg.unit.daemon.control_port = control;
    cfg.unit.daemon.data_dir = data_dir.path().to_string_lossy().into_owned();
    cfg.unit.readiness.mode = ReadinessMode::Tcp;
    cfg
}

/// A supervisor running in the background with its fakes.
pub struct TestUnit {
    pub journal: Journal,
    pub spawner: Arc<FakeSpawner>,
    pub token: CancellationToken,
    pub handle: JoinHandle<UnitOutcome>,
    _data_dir: TempDir,
}

impl TestUnit {
    /// Cancels the unit and waits for its outcome.
    pub async fn shutdown(self) -> UnitOutcome {
        self.token.cancel();
        self.outcome().await
    }

    pub async fn outcome(self) -> UnitOutcome {
        tokio::time::timeout(Duration::from_secs(3600), self.handle)
            .await
            .expect("supervisor did not finish")
            .expect("supervisor task panicked")
    }
}

/// Builds the unit. `tweak` adjusts the config, `script` programs the fake
/// spawner before anything runs.
pub fn start_unit(
    journal: Journal,
    probes: Arc<dyn ProbeFactory>,
    tweak: impl FnOnce(&mut Config),
    script: impl FnOnce(&FakeSpawner),
) -> TestUnit {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = test_config(&data_dir);
    tweak(&mut cfg);
    cfg.validate().expect("test config is valid");

    let spawner = FakeSpawner::new(journal.clone());
    script(&spawner);

    let token = CancellationToken::new();
    let supervisor = Supervisor::new(
        &cfg,
        spawner.clone(),
        Prober::with_factory(probes),
        token.clone(),
    )
    .expect("supervisor builds");

    TestUnit {
        journal,
        spawner,
        token,
        handle: tokio::spawn(supervisor.run()),
        _data_dir: data_dir,
    }
}

/// Fresh journal, for call sites that build probes first.
pub fn journal() -> Journal {
    new_journal()
}
