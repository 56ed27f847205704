//! Operating-system process spawning.
//!
//! [`Spawner`] is the only place a child process comes into existence. The
//! result is split in three so ownership stays explicit: the [`Waiter`] goes
//! to the observer task that reaps the child, the [`Signaller`] stays with the
//! Supervisor, and the output receiver is lent to whoever watches the logs.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::state::{ExitStatus, Role};

const OUTPUT_BUFFER: usize = 256;

/// Program, arguments and environment for one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Renders the command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// One line a child wrote to stdout or stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub line: String,
}

/// Blocks until the child exits and reaps it.
#[async_trait]
pub trait Waiter: Send {
    async fn wait(&mut self) -> io::Result<ExitStatus>;
}

/// Delivers termination signals to a child.
pub trait Signaller: Send + Sync {
    /// Graceful stop request (SIGTERM).
    fn terminate(&self) -> io::Result<()>;
    /// Forced stop (SIGKILL).
    fn kill(&self) -> io::Result<()>;
}

/// A freshly started child.
pub struct Spawned {
    pub pid: Option<u32>,
    pub waiter: Box<dyn Waiter>,
    pub signaller: Arc<dyn Signaller>,
    pub output: mpsc::Receiver<OutputLine>,
}

/// Starts operating-system processes.
pub trait Spawner: Send + Sync {
    fn spawn(&self, role: Role, spec: &LaunchSpec) -> io::Result<Spawned>;
}

/// [`Spawner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct CommandSpawner;

impl CommandSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Spawner for CommandSpawner {
    fn spawn(&self, role: Role, spec: &LaunchSpec) -> io::Result<Spawned> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(role, Stream::Stdout, stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(role, Stream::Stderr, stderr, tx);
        }

        debug!(
            component = "spawner",
            event = "spawned",
            role = role.as_str(),
            pid = ?pid,
            command = %spec.command_line(),
            "child process spawned"
        );

        Ok(Spawned {
            pid,
            waiter: Box::new(ChildWaiter { child }),
            signaller: Arc::new(PidSignaller { pid }),
            output: rx,
        })
    }
}

/// Re-emits every line of a child stream as a log record and offers it to
/// the output channel. Lines nobody is reading are dropped.
fn forward_lines<R>(role: Role, stream: Stream, reader: R, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::task::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(
                component = role.as_str(),
                stream = stream.as_str(),
                "{}",
                line
            );
            let _ = tx.try_send(OutputLine { stream, line });
        }
    });
}

struct ChildWaiter {
    child: Child,
}

#[async_trait]
impl Waiter for ChildWaiter {
    async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await.map(ExitStatus::from)
    }
}

struct PidSignaller {
    pid: Option<u32>,
}

impl PidSignaller {
    fn send(&self, signal: Signal) -> io::Result<()> {
        let Some(pid) = self.pid else {
            // already reaped
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }
}

impl Signaller for PidSignaller {
    fn terminate(&self) -> io::Result<()> {
        self.send(Signal::SIGTERM)
    }

    fn kill(&self) -> io::Result<()> {
        self.send(Signal::SIGKILL)
    }
}
