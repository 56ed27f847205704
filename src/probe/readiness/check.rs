// Package readiness provides configuration for the readiness gate.

use regex::Regex;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::config::{Config, ConfigTrait, ReadinessMode};

/// What counts as a positive answer.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// The endpoint accepts a TCP connection.
    TcpConnect,
    /// The control endpoint reports a finished bootstrap.
    ControlBootstrap { password: Option<String> },
    /// A line of daemon output matches.
    OutputMatch(Regex),
}

/// Probe configuration for one dependency gate. Built once at startup and
/// dropped once the gate opens or the unit aborts.
#[derive(Debug, Clone)]
pub struct ReadinessCheck {
    pub target: SocketAddr,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub predicate: Predicate,
}

impl ReadinessCheck {
    pub fn from_config(cfg: &Config) -> Result<Self, regex::Error> {
        let readiness = cfg.readiness();
        let predicate = match readiness.mode {
            ReadinessMode::Tcp => Predicate::TcpConnect,
            ReadinessMode::Control => Predicate::ControlBootstrap {
                password: cfg.daemon().control_password.clone(),
            },
            ReadinessMode::Output => Predicate::OutputMatch(Regex::new(&readiness.pattern)?),
        };

        Ok(Self {
            target: SocketAddr::from((Ipv4Addr::LOCALHOST, cfg.daemon().control_port)),
            poll_interval: readiness.poll_interval,
            max_wait: readiness.timeout,
            predicate,
        })
    }
}
