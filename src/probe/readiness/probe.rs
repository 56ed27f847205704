// Single-shot readiness queries.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TryRecvError};

use super::check::{Predicate, ReadinessCheck};
use super::control::ControlProbe;
use crate::process::OutputLine;

/// One lightweight query against the readiness target.
#[async_trait]
pub trait Probe: Send {
    /// `Ok(true)` on a positive answer, `Ok(false)` when the target answered
    /// but is not ready, `Err` when it could not be queried at all.
    async fn poll(&mut self) -> Result<bool>;
}

/// Builds the probe matching a check.
pub trait ProbeFactory: Send + Sync {
    fn create(
        &self,
        check: &ReadinessCheck,
        output: Option<mpsc::Receiver<OutputLine>>,
    ) -> Box<dyn Probe>;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultProbeFactory;

impl ProbeFactory for DefaultProbeFactory {
    fn create(
        &self,
        check: &ReadinessCheck,
        output: Option<mpsc::Receiver<OutputLine>>,
    ) -> Box<dyn Probe> {
        match &check.predicate {
            Predicate::TcpConnect => Box::new(TcpProbe::new(check.target)),
            Predicate::ControlBootstrap { password } => {
                Box::new(ControlProbe::new(check.target, password.clone()))
            }
            Predicate::OutputMatch(pattern) => Box::new(OutputProbe::new(pattern.clone(), output)),
        }
    }
}

/// Ready once the target accepts a connection.
pub struct TcpProbe {
    target: SocketAddr,
}

impl TcpProbe {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn poll(&mut self) -> Result<bool> {
        TcpStream::connect(self.target).await?;
        Ok(true)
    }
}

/// Ready once any output line matched. Stays ready afterwards.
pub struct OutputProbe {
    pattern: Regex,
    lines: Option<mpsc::Receiver<OutputLine>>,
    matched: bool,
}

impl OutputProbe {
    pub fn new(pattern: Regex, lines: Option<mpsc::Receiver<OutputLine>>) -> Self {
        Self {
            pattern,
            lines,
            matched: false,
        }
    }
}

#[async_trait]
impl Probe for OutputProbe {
    async fn poll(&mut self) -> Result<bool> {
        if self.matched {
            return Ok(true);
        }
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| anyhow!("daemon output is not available"))?;

        loop {
            match lines.try_recv() {
                Ok(line) => {
                    if self.pattern.is_match(&line.line) {
                        self.matched = true;
                        return Ok(true);
                    }
                }
                Err(TryRecvError::Empty) => return Ok(false),
                Err(TryRecvError::Disconnected) => {
                    self.lines = None;
                    return Ok(false);
                }
            }
        }
    }
}
