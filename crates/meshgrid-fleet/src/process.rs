//! Node process handles.
//!
//! A [`NodeProcess`] is whatever runs a broker or a node: a child process
//! on this machine, a session on a remote machine, or a simulated node.
//! The orchestrator only ever writes lines to it, reads its output lines
//! and terminates it.
//!
//! # Output pumps
//!
//! Each piped stream gets one pump task. A pump appends every line to the
//! role's aggregate log and forwards it on a broadcast channel; it never
//! touches orchestrator state. When the stream ends the pump drops its
//! sender, which closes every [`LineSource`] built on it.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mesh_core::{Host, Role};

use crate::error::{FleetError, FleetResult};
use crate::observer::LineSource;
use crate::sink::LogSink;

/// Lines buffered per output channel before slow readers lag.
pub const LINE_BUFFER: usize = 1024;

/// Time a process gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// A running broker or node.
#[async_trait]
pub trait NodeProcess: Send {
    fn role(&self) -> Role;

    /// Human-readable name used in logs, e.g. `server@127.0.0.1:1884`.
    fn label(&self) -> &str;

    /// Write one line to the process input.
    async fn write_line(&mut self, line: &str) -> FleetResult<()>;

    /// Stop the process. Safe to call on a process that already exited.
    async fn terminate(&mut self) -> FleetResult<()>;

    /// Line sources over the process output.
    ///
    /// The first call sees every line since launch; later calls only see
    /// lines printed after the call.
    fn output(&mut self) -> Vec<LineSource>;
}

pub(crate) fn label(role: Role, host: &Host) -> String {
    format!("{role}@{host}")
}

// ── Output tap ─────────────────────────────────────────────────────

/// Hands out line sources over a fixed set of broadcast channels.
#[derive(Debug)]
pub struct OutputTap {
    fresh: Vec<broadcast::Receiver<String>>,
    anchors: Vec<broadcast::Receiver<String>>,
}

impl OutputTap {
    /// Receivers must be subscribed before the first line is sent.
    pub fn new(receivers: Vec<broadcast::Receiver<String>>) -> Self {
        let anchors = receivers.iter().map(|rx| rx.resubscribe()).collect();
        Self {
            fresh: receivers,
            anchors,
        }
    }

    pub fn sources(&mut self) -> Vec<LineSource> {
        if !self.fresh.is_empty() {
            return self.fresh.drain(..).map(LineSource::new).collect();
        }
        self.anchors
            .iter()
            .map(|rx| LineSource::new(rx.resubscribe()))
            .collect()
    }
}

fn pump<R>(
    reader: R,
    role: Role,
    sink: LogSink,
    tx: broadcast::Sender<String>,
    label: String,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Err(e) = sink.append_line(role, &line).await {
                        warn!(%label, error = %e, "failed to append output line");
                    }
                    let _ = tx.send(line);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(%label, error = %e, "output stream failed");
                    break;
                }
            }
        }
        debug!(%label, "output stream closed");
    })
}

// ── Piped child ────────────────────────────────────────────────────

/// A child with piped stdio and one pump per output stream.
struct PipedChild {
    child: Child,
    stdin: Option<ChildStdin>,
    tap: OutputTap,
    pumps: Vec<JoinHandle<()>>,
}

impl PipedChild {
    fn spawn(mut command: Command, role: Role, sink: &LogSink, label: &str) -> FleetResult<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn()?;

        let mut receivers = Vec::with_capacity(2);
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let (tx, rx) = broadcast::channel(LINE_BUFFER);
            receivers.push(rx);
            pumps.push(pump(stdout, role, sink.clone(), tx, label.to_string()));
        }
        if let Some(stderr) = child.stderr.take() {
            let (tx, rx) = broadcast::channel(LINE_BUFFER);
            receivers.push(rx);
            pumps.push(pump(stderr, role, sink.clone(), tx, label.to_string()));
        }
        let stdin = child.stdin.take();
        debug!(%label, pid = ?child.id(), "process spawned");

        Ok(Self {
            child,
            stdin,
            tap: OutputTap::new(receivers),
            pumps,
        })
    }

    async fn write_line(&mut self, line: &str) -> FleetResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(FleetError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "process input is closed",
            )));
        };
        stdin.write_all(format!("{line}\n").as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn terminate(&mut self, label: &str) -> FleetResult<()> {
        self.stdin.take();
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        if let Some(pid) = self.child.id() {
            // SAFETY: `pid` belongs to a child we spawned and have not reaped.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 {
                if let Ok(status) = tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
                    let status = status?;
                    debug!(%label, ?status, "process exited");
                    return Ok(());
                }
            }
        }
        warn!(%label, "process ignored SIGTERM, killing");
        self.child.kill().await?;
        Ok(())
    }
}

impl Drop for PipedChild {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

// ── Local process ──────────────────────────────────────────────────

/// A broker or node running as a child of the orchestrator.
pub struct LocalProcess {
    role: Role,
    label: String,
    inner: PipedChild,
}

impl LocalProcess {
    pub fn spawn(argv: &[String], role: Role, host: &Host, sink: &LogSink) -> FleetResult<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(FleetError::Launch {
                role,
                reason: "empty command template".into(),
            });
        };
        let mut command = Command::new(program);
        command.args(args);
        let label = label(role, host);
        let inner = PipedChild::spawn(command, role, sink, &label)?;
        Ok(Self { role, label, inner })
    }
}

#[async_trait]
impl NodeProcess for LocalProcess {
    fn role(&self) -> Role {
        self.role
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn write_line(&mut self, line: &str) -> FleetResult<()> {
        self.inner.write_line(line).await
    }

    async fn terminate(&mut self) -> FleetResult<()> {
        self.inner.terminate(&self.label).await
    }

    fn output(&mut self) -> Vec<LineSource> {
        self.inner.tap.sources()
    }
}

// ── Remote session ─────────────────────────────────────────────────

/// A broker or node running inside a session on a remote machine.
///
/// The local half is the session client process; closing its input ends
/// the remote command's input as well.
pub struct RemoteSession {
    role: Role,
    label: String,
    host: Host,
    inner: PipedChild,
}

impl RemoteSession {
    /// `client` is the session client invocation up to the destination,
    /// `remote` the command line to run on the far side.
    pub fn open(
        client: &[String],
        remote: &str,
        role: Role,
        host: &Host,
        sink: &LogSink,
    ) -> FleetResult<Self> {
        let Some((program, args)) = client.split_first() else {
            return Err(FleetError::Session {
                host: host.to_string(),
                reason: "empty session client".into(),
            });
        };
        let mut command = Command::new(program);
        command.args(args).arg(remote);
        let label = label(role, host);
        let inner = PipedChild::spawn(command, role, sink, &label)?;
        Ok(Self {
            role,
            label,
            host: host.clone(),
            inner,
        })
    }

    pub fn host(&self) -> &Host {
        &self.host
    }
}

#[async_trait]
impl NodeProcess for RemoteSession {
    fn role(&self) -> Role {
        self.role
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn write_line(&mut self, line: &str) -> FleetResult<()> {
        self.inner.write_line(line).await
    }

    async fn terminate(&mut self) -> FleetResult<()> {
        self.inner.terminate(&self.label).await
    }

    fn output(&mut self) -> Vec<LineSource> {
        self.inner.tap.sources()
    }
}
