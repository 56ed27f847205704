// Main entrypoint for the unitvisor supervisor.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use unitvisor::config::{Config, ConfigTrait, Overrides};
use unitvisor::launcher::DaemonLauncher;
use unitvisor::process::CommandSpawner;
use unitvisor::readiness::Prober;
use unitvisor::shutdown::GracefulShutdown;
use unitvisor::supervisor::{Supervisor, UnitOutcome};

const CONFIG_PATH: &str = "cfg/unitvisor.cfg.yaml";
const CONFIG_PATH_LOCAL: &str = "cfg/unitvisor.cfg.local.yaml";

/// Exit status for configuration and startup errors.
const STARTUP_FAILURE: u8 = 2;

/// unitvisor - starts an anonymizing-network daemon and an application
/// server, gates one on the other, and supervises both
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Custom config file path
    #[arg(short, long, value_name = "FILE")]
    cfg: Option<PathBuf>,

    /// Validate the configuration, print it with the rendered daemon config and exit
    #[arg(long)]
    check: bool,

    /// Application public port
    #[arg(long, env = "UNITVISOR_APP_PORT")]
    app_port: Option<u16>,

    /// Daemon local proxy port
    #[arg(long, env = "UNITVISOR_PROXY_PORT")]
    proxy_port: Option<u16>,

    /// Daemon local control port
    #[arg(long, env = "UNITVISOR_CONTROL_PORT")]
    control_port: Option<u16>,

    /// Start the application only after the daemon is ready
    #[arg(long, env = "UNITVISOR_GATED")]
    gated: Option<bool>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            app_port: self.app_port,
            proxy_port: self.proxy_port,
            control_port: self.control_port,
            gated: self.gated,
        }
    }
}

/// Loads the configuration struct from YAML file.
/// Tries local config first, then the default config, then built-in defaults.
/// Returns the config and where it came from; logging is not up yet.
fn load_cfg(path: Option<PathBuf>) -> Result<(Config, String)> {
    if let Some(custom_path) = path {
        let cfg = Config::load(&custom_path)
            .with_context(|| format!("failed to load custom config from {:?}", custom_path))?;
        return Ok((cfg, custom_path.display().to_string()));
    }

    if let Ok(cfg) = Config::load(CONFIG_PATH_LOCAL) {
        return Ok((cfg, CONFIG_PATH_LOCAL.to_string()));
    }

    if PathBuf::from(CONFIG_PATH).exists() {
        let cfg = Config::load(CONFIG_PATH)
            .with_context(|| format!("failed to load config from {}", CONFIG_PATH))?;
        return Ok((cfg, CONFIG_PATH.to_string()));
    }

    Ok((Config::default(), "built-in defaults".to_string()))
}

/// Configures structured logging based on configuration.
fn configure_logger(cfg: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let log_level = cfg.logs().level.as_deref().unwrap_or("info");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if cfg.is_prod() {
        // Production: JSON format
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        // Development: Pretty console format
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

fn print_check(cfg: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(cfg).context("failed to render configuration")?;
    println!("{}", yaml);

    let launcher = DaemonLauncher::new(cfg.daemon().clone(), Arc::new(CommandSpawner::new()));
    println!("# {}", launcher.config_path().display());
    print!("{}", launcher.render_config());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("unitvisor: {:#}", e);
            ExitCode::from(STARTUP_FAILURE)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let (mut cfg, source) = load_cfg(args.cfg.clone())?;
    cfg.apply(&args.overrides());
    cfg.validate().context("invalid configuration")?;

    if args.check {
        print_check(&cfg)?;
        return Ok(ExitCode::SUCCESS);
    }

    tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?
        .block_on(async_main(cfg, source))
}

async fn async_main(cfg: Config, source: String) -> Result<ExitCode> {
    // Configure logger (must be done after config is loaded)
    configure_logger(&cfg);

    info!(
        component = "config",
        event = "load_success",
        source = %source,
        "config loaded"
    );

    // Create cancellation token for graceful shutdown
    let shutdown_token = CancellationToken::new();
    GracefulShutdown::new(shutdown_token.clone(), cfg.shutdown().timeout).listen();

    let supervisor = Supervisor::new(
        &cfg,
        Arc::new(CommandSpawner::new()),
        Prober::new(),
        shutdown_token,
    )?;

    let outcome = supervisor.run().await;
    report(&outcome);

    Ok(ExitCode::from(outcome.exit_code()))
}

/// Writes the final log line naming the outcome.
fn report(outcome: &UnitOutcome) {
    match outcome {
        UnitOutcome::Shutdown => info!(
            component = "main",
            event = "unit_finished",
            cause = outcome.cause(),
            exit_code = outcome.exit_code(),
            "unit finished: {}",
            outcome
        ),
        UnitOutcome::ShutdownTimedOut | UnitOutcome::ApplicationStopped => warn!(
            component = "main",
            event = "unit_finished",
            cause = outcome.cause(),
            exit_code = outcome.exit_code(),
            "unit finished: {}",
            outcome
        ),
        _ => error!(
            component = "main",
            event = "unit_finished",
            cause = outcome.cause(),
            exit_code = outcome.exit_code(),
            "unit finished: {}",
            outcome
        ),
    }
}
