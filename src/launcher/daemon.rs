//! Anonymizing-network daemon launcher.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{ports, Launch, LaunchError};
use crate::config::Daemon;
use crate::process::{LaunchSpec, Role, Spawner};

pub const CONFIG_FILE: &str = "daemon.conf";

const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);
const VERIFY_TAIL_LINES: usize = 5;

/// Starts the daemon with a generated configuration file exposing the proxy
/// and control listeners on loopback.
pub struct DaemonLauncher {
    cfg: Daemon,
    spawner: Arc<dyn Spawner>,
}

impl DaemonLauncher {
    pub fn new(cfg: Daemon, spawner: Arc<dyn Spawner>) -> Self {
        Self { cfg, spawner }
    }

    pub fn config_path(&self) -> PathBuf {
        Path::new(&self.cfg.data_dir).join(CONFIG_FILE)
    }

    /// Renders the daemon configuration file.
    pub fn render_config(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# generated by unitvisor, changes are overwritten");
        let _ = writeln!(out, "SocksPort 127.0.0.1:{}", self.cfg.proxy_port);
        let _ = writeln!(out, "ControlPort 127.0.0.1:{}", self.cfg.control_port);
        let _ = writeln!(out, "DataDirectory {}", self.cfg.data_dir);
        for line in &self.cfg.extra_config {
            let _ = writeln!(out, "{}", line);
        }
        out
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec::new(self.cfg.program.as_str())
            .arg("-f")
            .arg(self.config_path().to_string_lossy())
            .args(self.cfg.args.iter().cloned())
    }

    /// Starts the daemon. The returned process has not been probed yet.
    pub async fn start(&self) -> Result<Launch, LaunchError> {
        ports::ensure_free("proxy", self.cfg.proxy_port)?;
        ports::ensure_free("control", self.cfg.control_port)?;

        self.write_config()?;
        if self.cfg.verify_config {
            self.verify().await?;
        }

        let spec = self.launch_spec();
        let spawned = self
            .spawner
            .spawn(Role::Daemon, &spec)
            .map_err(|e| LaunchError::from_spawn(&spec.program, e))?;

        info!(
            component = "daemon_launcher",
            event = "launched",
            pid = ?spawned.pid,
            proxy_port = self.cfg.proxy_port,
            control_port = self.cfg.control_port,
            command = %spec.command_line(),
            "daemon launched"
        );

        Ok(Launch { spec, spawned })
    }

    fn write_config(&self) -> Result<(), LaunchError> {
        let dir = Path::new(&self.cfg.data_dir);
        std::fs::create_dir_all(dir).map_err(|e| LaunchError::BadConfiguration {
            reason: format!("cannot create data dir {:?}: {}", dir, e),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(
                |e| LaunchError::BadConfiguration {
                    reason: format!("cannot restrict data dir {:?}: {}", dir, e),
                },
            )?;
        }

        let path = self.config_path();
        std::fs::write(&path, self.render_config()).map_err(|e| {
            LaunchError::BadConfiguration {
                reason: format!("cannot write {:?}: {}", path, e),
            }
        })
    }

    /// Lets the daemon check its own configuration before the real launch.
    async fn verify(&self) -> Result<(), LaunchError> {
        let spec = LaunchSpec::new(self.cfg.program.as_str())
            .arg("--verify-config")
            .arg("-f")
            .arg(self.config_path().to_string_lossy());
        let mut spawned = self
            .spawner
            .spawn(Role::Daemon, &spec)
            .map_err(|e| LaunchError::from_spawn(&spec.program, e))?;

        match timeout(VERIFY_TIMEOUT, spawned.waiter.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => {
                let mut tail = Vec::new();
                while let Ok(line) = spawned.output.try_recv() {
                    tail.push(line.line);
                }
                let skip = tail.len().saturating_sub(VERIFY_TAIL_LINES);
                Err(LaunchError::BadConfiguration {
                    reason: format!(
                        "daemon rejected its configuration ({}): {}",
                        status,
                        tail[skip..].join(" | ")
                    ),
                })
            }
            Ok(Err(e)) => Err(LaunchError::Spawn {
                program: spec.program,
                source: e,
            }),
            Err(_) => {
                if let Err(e) = spawned.signaller.kill() {
                    warn!(
                        component = "daemon_launcher",
                        event = "verify_kill_failed",
                        error = %e,
                        "failed to kill configuration check"
                    );
                }
                Err(LaunchError::BadConfiguration {
                    reason: format!(
                        "configuration check did not finish within {}",
                        humantime::format_duration(VERIFY_TIMEOUT)
                    ),
                })
            }
        }
    }
}
