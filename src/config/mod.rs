// Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const PROD: &str = "prod";
pub const DEV: &str = "dev";
#[allow(dead_code)]
pub const TEST: &str = "test";

/// How the daemon's readiness is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessMode {
    Tcp,     // control endpoint accepts connections
    Control, // control endpoint reports PROGRESS=100
    Output,  // a daemon output line matches the pattern
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} port must be non-zero")]
    ZeroPort(&'static str),
    #[error("{first} port and {second} port are both {port}")]
    PortClash {
        first: &'static str,
        second: &'static str,
        port: u16,
    },
    #[error("readiness.poll_interval must be non-zero")]
    ZeroPollInterval,
    #[error("readiness.poll_interval ({interval:?}) exceeds readiness.timeout ({timeout:?})")]
    PollLongerThanTimeout { interval: Duration, timeout: Duration },
    #[error("restart.backoff_base must be non-zero")]
    ZeroBackoff,
    #[error("restart.backoff_base ({base:?}) exceeds restart.backoff_ceiling ({ceiling:?})")]
    BackoffAboveCeiling { base: Duration, ceiling: Duration },
    #[error("{0}.program must not be empty")]
    EmptyProgram(&'static str),
    #[error("readiness.pattern is invalid: {0}")]
    BadPattern(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Unit {
    #[serde(rename = "unit")]
    pub unit: UnitBox,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnitBox {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub logs: Logs,
    #[serde(default)]
    pub daemon: Daemon,
    #[serde(default)]
    pub readiness: Readiness,
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub restart: Restart,
    #[serde(default)]
    pub shutdown: Shutdown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logs {
    pub level: Option<String>,
}

impl Default for Logs {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Daemon {
    pub program: String,
    pub args: Vec<String>,
    #[serde(rename = "proxy_port")]
    pub proxy_port: u16,
    #[serde(rename = "control_port")]
    pub control_port: u16,
    #[serde(rename = "data_dir")]
    pub data_dir: String,
    #[serde(rename = "extra_config")]
    pub extra_config: Vec<String>,
    #[serde(rename = "verify_config")]
    pub verify_config: bool,
    #[serde(rename = "control_password")]
    pub control_password: Option<String>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self {
            program: "tor".to_string(),
            args: Vec::new(),
            proxy_port: 9050,
            control_port: 9051,
            data_dir: "/var/lib/unitvisor/daemon".to_string(),
            extra_config: Vec::new(),
            verify_config: false,
            control_password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Readiness {
    pub mode: ReadinessMode,
    pub pattern: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(rename = "poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    pub retries: u32,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            mode: ReadinessMode::Control,
            pattern: "Bootstrapped 100%".to_string(),
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct App {
    pub program: String,
    pub args: Vec<String>,
    pub port: u16,
    pub env: BTreeMap<String, String>,
    pub gated: bool,
    #[serde(rename = "export_proxy_env")]
    pub export_proxy_env: bool,
}

impl Default for App {
    fn default() -> Self {
        Self {
            program: "./server".to_string(),
            args: Vec::new(),
            port: 8080,
            env: BTreeMap::new(),
            gated: true,
            export_proxy_env: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Restart {
    #[serde(rename = "max_restarts")]
    pub max_restarts: u32,
    #[serde(rename = "backoff_base", with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(rename = "backoff_ceiling", with = "humantime_serde")]
    pub backoff_ceiling: Duration,
    #[serde(rename = "reset_after", with = "humantime_serde")]
    pub reset_after: Duration,
}

impl Default for Restart {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(30),
            reset_after: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Shutdown {
    #[serde(rename = "grace_period", with = "humantime_serde")]
    pub grace_period: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

fn default_env() -> String {
    DEV.to_string()
}

/// Values taken from the command line or environment that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub app_port: Option<u16>,
    pub proxy_port: Option<u16>,
    pub control_port: Option<u16>,
    pub gated: Option<bool>,
}

// Config trait
pub trait ConfigTrait {
    fn logs(&self) -> &Logs;
    fn is_prod(&self) -> bool;
    fn daemon(&self) -> &Daemon;
    fn readiness(&self) -> &Readiness;
    fn app(&self) -> &App;
    fn restart(&self) -> &Restart;
    fn shutdown(&self) -> &Shutdown;
}

// Config type alias for convenience
pub type Config = Unit;

impl ConfigTrait for Config {
    fn logs(&self) -> &Logs {
        &self.unit.logs
    }

    fn is_prod(&self) -> bool {
        self.unit.env == PROD
    }

    fn daemon(&self) -> &Daemon {
        &self.unit.daemon
    }

    fn readiness(&self) -> &Readiness {
        &self.unit.readiness
    }

    fn app(&self) -> &App {
        &self.unit.app
    }

    fn restart(&self) -> &Restart {
        &self.unit.restart
    }

    fn shutdown(&self) -> &Shutdown {
        &self.unit.shutdown
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unit: UnitBox {
                env: default_env(),
                logs: Logs::default(),
                daemon: Daemon::default(),
                readiness: Readiness::default(),
                app: App::default(),
                restart: Restart::default(),
                shutdown: Shutdown::default(),
            },
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let abs_path = path
            .canonicalize()
            .with_context(|| format!("failed to resolve absolute config filepath: {:?}", path))?;

        let data = std::fs::read_to_string(&abs_path)
            .with_context(|| format!("read config yaml file {:?}", abs_path))?;

        Self::from_yaml(&data).with_context(|| format!("unmarshal yaml from {:?}", abs_path))
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Unit = serde_yaml::from_str(data)?;
        Ok(cfg)
    }

    /// Applies command line and environment overrides on top of the file.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(port) = overrides.app_port {
            self.unit.app.port = port;
        }
        if let Some(port) = overrides.proxy_port {
            self.unit.daemon.proxy_port = port;
        }
        if let Some(port) = overrides.control_port {
            self.unit.daemon.control_port = port;
        }
        if let Some(gated) = overrides.gated {
            self.unit.app.gated = gated;
        }
    }

    /// Checks cross-field constraints. Called once at startup; the
    /// configuration is never mutated afterwards.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ports = [
            ("application", self.app().port),
            ("proxy", self.daemon().proxy_port),
            ("control", self.daemon().control_port),
        ];
        for (name, port) in ports {
            if port == 0 {
                return Err(ConfigError::ZeroPort(name));
            }
        }
        for (i, (first, a)) in ports.iter().enumerate() {
            for (second, b) in &ports[i + 1..] {
                if a == b {
                    return Err(ConfigError::PortClash {
                        first: *first,
                        second: *second,
                        port: *a,
                    });
                }
            }
        }

        let readiness = self.readiness();
        if readiness.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if readiness.poll_interval > readiness.timeout {
            return Err(ConfigError::PollLongerThanTimeout {
                interval: readiness.poll_interval,
                timeout: readiness.timeout,
            });
        }
        if readiness.mode == ReadinessMode::Output {
            regex::Regex::new(&readiness.pattern)
                .map_err(|e| ConfigError::BadPattern(e.to_string()))?;
        }

        let restart = self.restart();
        if restart.backoff_base.is_zero() {
            return Err(ConfigError::ZeroBackoff);
        }
        if restart.backoff_base > restart.backoff_ceiling {
            return Err(ConfigError::BackoffAboveCeiling {
                base: restart.backoff_base,
                ceiling: restart.backoff_ceiling,
            });
        }

        if self.daemon().program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram("daemon"));
        }
        if self.app().program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram("app"));
        }

        Ok(())
    }
}

// Test config is always available for integration tests
mod test_config;
#[allow(dead_code)]
pub use test_config::new_test_config;
