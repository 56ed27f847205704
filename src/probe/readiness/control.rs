// Control-port bootstrap query.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use regex::Regex;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::debug;

use super::probe::Probe;

const BOOTSTRAP_QUERY: &[u8] = b"GETINFO status/bootstrap-phase\r\n";

/// Authenticates on the daemon's control port and asks for the bootstrap
/// phase. Ready when the daemon reports `PROGRESS=100`.
pub struct ControlProbe {
    target: SocketAddr,
    password: Option<String>,
    progress: Regex,
}

impl ControlProbe {
    pub fn new(target: SocketAddr, password: Option<String>) -> Self {
        Self {
            target,
            password,
            progress: Regex::new(r"PROGRESS=(\d+)").expect("progress pattern is a valid literal"),
        }
    }

    fn authenticate_line(&self) -> String {
        match &self.password {
            Some(p) => format!(
                "AUTHENTICATE \"{}\"\r\n",
                p.replace('\\', "\\\\").replace('"', "\\\"")
            ),
            None => "AUTHENTICATE\r\n".to_string(),
        }
    }
}

/// Reads one (possibly multi-line) reply. The last line has a space after
/// the status code, continuation lines a dash.
async fn read_reply(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Result<Vec<String>> {
    let mut reply = Vec::new();
    loop {
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| anyhow!("control connection closed"))?;
        let last = line.as_bytes().get(3) == Some(&b' ') || line.len() == 3;
        reply.push(line);
        if last {
            return Ok(reply);
        }
    }
}

fn is_ok(reply: &[String]) -> bool {
    reply.last().map(|l| l.starts_with("250")).unwrap_or(false)
}

#[async_trait]
impl Probe for ControlProbe {
    async fn poll(&mut self) -> Result<bool> {
        let stream = TcpStream::connect(self.target).await?;
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(self.authenticate_line().as_bytes()).await?;
        let reply = read_reply(&mut lines).await?;
        if !is_ok(&reply) {
            bail!("control authentication refused: {}", reply.join(" "));
        }

        write.write_all(BOOTSTRAP_QUERY).await?;
        let reply = read_reply(&mut lines).await?;
        let _ = write.write_all(b"QUIT\r\n").await;
        if !is_ok(&reply) {
            bail!("bootstrap query refused: {}", reply.join(" "));
        }

        let progress = reply
            .iter()
            .find_map(|l| self.progress.captures(l))
            .and_then(|c| c[1].parse::<u8>().ok())
            .ok_or_else(|| anyhow!("no bootstrap progress in reply: {}", reply.join(" ")))?;

        debug!(
            component = "readiness",
            event = "bootstrap_progress",
            progress,
            "daemon bootstrap progress"
        );
        Ok(progress >= 100)
    }
}
