//! Application server launcher.

use std::sync::Arc;
use tracing::info;

use super::{ports, Launch, LaunchError};
use crate::config::App;
use crate::process::{LaunchSpec, Role, Spawner};

/// Starts the application server on its public port. Whether it waits for
/// the daemon is the Supervisor's call, not the launcher's.
pub struct ApplicationLauncher {
    cfg: App,
    proxy_port: u16,
    control_port: u16,
    spawner: Arc<dyn Spawner>,
}

impl ApplicationLauncher {
    pub fn new(cfg: App, proxy_port: u16, control_port: u16, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            cfg,
            proxy_port,
            control_port,
            spawner,
        }
    }

    fn substitute(&self, arg: &str) -> String {
        arg.replace("{port}", &self.cfg.port.to_string())
            .replace("{proxy_port}", &self.proxy_port.to_string())
            .replace("{control_port}", &self.control_port.to_string())
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        let mut spec = LaunchSpec::new(self.cfg.program.as_str())
            .args(self.cfg.args.iter().map(|a| self.substitute(a)))
            .env("PORT", self.cfg.port.to_string());

        if self.cfg.export_proxy_env {
            let proxy = format!("socks5h://127.0.0.1:{}", self.proxy_port);
            spec = spec
                .env("ALL_PROXY", proxy.as_str())
                .env("HTTPS_PROXY", proxy.as_str())
                .env("HTTP_PROXY", proxy);
        }
        for (k, v) in &self.cfg.env {
            spec = spec.env(k.as_str(), self.substitute(v));
        }
        spec
    }

    pub async fn start(&self) -> Result<Launch, LaunchError> {
        ports::ensure_free("application", self.cfg.port)?;

        let spec = self.launch_spec();
        let spawned = self
            .spawner
            .spawn(Role::Application, &spec)
            .map_err(|e| LaunchError::from_spawn(&spec.program, e))?;

        info!(
            component = "application_launcher",
            event = "launched",
            pid = ?spawned.pid,
            port = self.cfg.port,
            command = %spec.command_line(),
            "application launched"
        );

        Ok(Launch { spec, spawned })
    }
}
