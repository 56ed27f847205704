use super::{App, Config, Daemon, Logs, Readiness, ReadinessMode, Restart, Shutdown, UnitBox};
use std::collections::BTreeMap;
use std::time::Duration;

/// Creates a new test configuration.
///
/// Ports are fixed and may collide with a running daemon on the host, tests
/// that perform the port preflight overwrite them with free ones.
pub fn new_test_config() -> Config {
    Config {
        unit: UnitBox {
            env: super::TEST.to_string(),
            logs: Logs {
                level: Some("debug".to_string()),
            },
            daemon: Daemon {
                program: "tor".to_string(),
                args: Vec::new(),
                proxy_port: 19050,
                control_port: 19051,
                data_dir: std::env::temp_dir()
                    .join("unitvisor-test-daemon")
                    .to_string_lossy()
                    .into_owned(),
                extra_config: vec!["Log notice stdout".to_string()],
                verify_config: false,
                control_password: None,
            },
            readiness: Readiness {
                mode: ReadinessMode::Tcp,
                pattern: "Bootstrapped 100%".to_string(),
                timeout: Duration::from_secs(5),
                poll_interval: Duration::from_secs(1),
                retries: 0,
            },
            app: App {
                program: "server".to_string(),
                args: vec!["--port".to_string(), "{port}".to_string()],
                port: 18080,
                env: BTreeMap::new(),
                gated: true,
                export_proxy_env: true,
            },
            restart: Restart {
                max_restarts: 3,
                backoff_base: Duration::from_secs(1),
                backoff_ceiling: Duration::from_secs(8),
                reset_after: Duration::from_secs(60),
            },
            shutdown: Shutdown {
                grace_period: Duration::from_secs(2),
                timeout: Duration::from_secs(10),
            },
        },
    }
}
