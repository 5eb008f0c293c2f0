//! Scripted launcher: simulated brokers and nodes running in-process.
//!
//! Used by `--dry-run` and by tests. Simulated processes print the same
//! ready sentinels as the real programs, answer the node input lines with
//! plausible output, and record everything they were sent in a shared
//! journal. Individual placements can be told to fail or hang, and remote
//! sessions to particular machines can be refused.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use mesh_core::protocol::{ECHO_PING, NEW_SERVING_REGION, NEXT_HOP, SERVER_READY};
use mesh_core::{Host, Role, SyntheticPoint, Transport};

use crate::error::{FleetError, FleetResult};
use crate::launcher::{LaunchSpec, Launcher};
use crate::observer::LineSource;
use crate::process::{LINE_BUFFER, NodeProcess, OutputTap, label};
use crate::sink::LogSink;

/// One line written to a simulated process.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub host: Host,
    pub role: Role,
    pub line: String,
}

#[derive(Default)]
struct ScriptState {
    journal: Vec<JournalEntry>,
    launches: Vec<(Host, Role)>,
    running_brokers: HashSet<Host>,
    live_servers: HashSet<String>,
    fail_at: Vec<SyntheticPoint>,
    hang_at: Vec<SyntheticPoint>,
    failing_hosts: HashSet<Host>,
    refused: HashSet<String>,
    terminated: Vec<String>,
}

/// Launcher whose processes are simulated in-process.
#[derive(Clone)]
pub struct ScriptedLauncher {
    transport: Transport,
    sink: LogSink,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedLauncher {
    pub fn new(transport: Transport, sink: LogSink) -> Self {
        Self {
            transport,
            sink,
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Nodes launched at `point` exit before reporting ready.
    pub fn fail_at(&self, point: SyntheticPoint) {
        self.state().fail_at.push(point);
    }

    /// Nodes launched on `host` exit before reporting ready.
    pub fn fail_on(&self, host: Host) {
        self.state().failing_hosts.insert(host);
    }

    /// Nodes launched at `point` never report ready.
    pub fn hang_at(&self, point: SyntheticPoint) {
        self.state().hang_at.push(point);
    }

    /// Session negotiation with `ip` fails.
    pub fn refuse_session(&self, ip: impl Into<String>) {
        self.state().refused.insert(ip.into());
    }

    /// Pretend a broker was already listening on `host`.
    pub fn preset_broker(&self, host: Host) {
        self.state().running_brokers.insert(host);
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state().journal.clone()
    }

    /// Lines sent to processes whose line starts with `keyword`.
    pub fn sent(&self, keyword: &str) -> Vec<JournalEntry> {
        self.state()
            .journal
            .iter()
            .filter(|e| e.line.starts_with(keyword))
            .cloned()
            .collect()
    }

    pub fn launches(&self) -> Vec<(Host, Role)> {
        self.state().launches.clone()
    }

    pub fn launch_count(&self, role: Role) -> usize {
        self.state().launches.iter().filter(|(_, r)| *r == role).count()
    }

    /// Labels of processes terminated so far, in order.
    pub fn terminated(&self) -> Vec<String> {
        self.state().terminated.clone()
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    fn transport(&self) -> Transport {
        self.transport
    }

    async fn open_session(&self, host: &Host) -> FleetResult<()> {
        if self.state().refused.contains(&host.ip) {
            return Err(FleetError::Session {
                host: host.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn broker_running(&self, host: &Host) -> bool {
        self.state().running_brokers.contains(host)
    }

    async fn launch(&self, host: &Host, spec: &LaunchSpec) -> FleetResult<Box<dyn NodeProcess>> {
        let role = spec.role();
        let point = match spec {
            LaunchSpec::Root { point } | LaunchSpec::Server { point } => Some(*point),
            LaunchSpec::Broker => None,
        };
        let (fails, hangs) = {
            let mut state = self.state();
            state.launches.push((host.clone(), role));
            let fails = point.is_some_and(|p| state.fail_at.contains(&p))
                || (role != Role::Broker && state.failing_hosts.contains(host));
            let hangs = point.is_some_and(|p| state.hang_at.contains(&p));
            (fails, hangs)
        };

        let mut process =
            ScriptedProcess::new(role, host.clone(), self.sink.clone(), Arc::clone(&self.state));
        if fails {
            process.emit("Error: Address already in use").await;
            process.close();
        } else if hangs {
            process.emit("Connecting...").await;
        } else {
            match role {
                Role::Broker => {
                    process
                        .emit(&format!("mosquitto version 2.0 running on port {}", host.port))
                        .await;
                    self.state().running_brokers.insert(host.clone());
                }
                Role::Root => process.emit("Connection status: CONNECTED").await,
                Role::Server => {
                    process.emit(SERVER_READY).await;
                    self.state().live_servers.insert(process.label.clone());
                }
            }
        }
        debug!(%host, %role, fails, hangs, "scripted launch");
        Ok(Box::new(process))
    }
}

/// A simulated broker or node.
struct ScriptedProcess {
    role: Role,
    label: String,
    host: Host,
    sink: LogSink,
    state: Arc<Mutex<ScriptState>>,
    tx: Option<broadcast::Sender<String>>,
    tap: OutputTap,
}

impl ScriptedProcess {
    fn new(role: Role, host: Host, sink: LogSink, state: Arc<Mutex<ScriptState>>) -> Self {
        let (tx, rx) = broadcast::channel(LINE_BUFFER);
        Self {
            role,
            label: label(role, &host),
            host,
            sink,
            state,
            tx: Some(tx),
            tap: OutputTap::new(vec![rx]),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn emit(&self, line: &str) {
        let _ = self.sink.append_line(self.role, line).await;
        if let Some(tx) = &self.tx {
            let _ = tx.send(line.to_string());
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }

    /// Output a node prints in answer to one input line.
    fn respond(&self, line: &str) -> Vec<String> {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("query") => {
                let target = words.next().unwrap_or_default();
                vec![format!("Query result for {target}: {}", self.host)]
            }
            Some("serving_region") => {
                let target = words.next().unwrap_or_default();
                vec![format!("Serving region of {target} received")]
            }
            Some("ping_block") | Some("ping_region") => {
                let rest: Vec<&str> = words.collect();
                let message = rest.get(if line.starts_with("ping_block") { 2 } else { 4 });
                vec![
                    NEXT_HOP.to_string(),
                    format!("{} {ECHO_PING}", message.copied().unwrap_or_default()),
                ]
            }
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl NodeProcess for ScriptedProcess {
    fn role(&self) -> Role {
        self.role
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn write_line(&mut self, line: &str) -> FleetResult<()> {
        if self.tx.is_none() {
            return Err(FleetError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "process input is closed",
            )));
        }
        let handovers = {
            let mut state = self.state();
            state.journal.push(JournalEntry {
                host: self.host.clone(),
                role: self.role,
                line: line.to_string(),
            });
            if line == "remove_server" && state.live_servers.remove(&self.label) {
                state.live_servers.len()
            } else {
                0
            }
        };
        for _ in 0..handovers {
            let _ = self.sink.append_line(Role::Server, NEW_SERVING_REGION).await;
        }
        for reply in self.respond(line) {
            self.emit(&reply).await;
        }
        Ok(())
    }

    async fn terminate(&mut self) -> FleetResult<()> {
        if self.tx.take().is_some() {
            let mut state = self.state();
            state.live_servers.remove(&self.label);
            state.terminated.push(self.label.clone());
            if self.role == Role::Broker {
                state.running_brokers.remove(&self.host);
            }
        }
        Ok(())
    }

    fn output(&mut self) -> Vec<LineSource> {
        self.tap.sources()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn launcher() -> (tempfile::TempDir, ScriptedLauncher) {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path()).await.unwrap();
        (dir, ScriptedLauncher::new(Transport::Local, sink))
    }

    #[tokio::test]
    async fn broker_reports_running_and_is_probed() {
        let (_dir, launcher) = launcher().await;
        let host = Host::new("127.0.0.1", 1883);
        assert!(!launcher.broker_running(&host).await);

        let mut broker = launcher.launch(&host, &LaunchSpec::Broker).await.unwrap();
        let mut sources = broker.output();
        let line = sources[0].next_line().await.unwrap();
        assert!(line.contains(Role::Broker.ready_sentinel()));
        assert!(launcher.broker_running(&host).await);

        broker.terminate().await.unwrap();
        assert!(!launcher.broker_running(&host).await);
        assert_eq!(launcher.terminated(), vec!["broker@127.0.0.1:1883"]);
    }

    #[tokio::test]
    async fn failing_node_closes_output() {
        let (_dir, launcher) = launcher().await;
        let point = SyntheticPoint::new(3.0, 3.0);
        launcher.fail_at(point);

        let mut node = launcher
            .launch(&Host::new("127.0.0.1", 1884), &LaunchSpec::Server { point })
            .await
            .unwrap();
        let mut sources = node.output();
        assert!(sources[0].next_line().await.unwrap().starts_with("Error"));
        assert_eq!(sources[0].next_line().await, None);
    }

    #[tokio::test]
    async fn removal_announces_handovers() {
        let (dir, launcher) = launcher().await;
        let mut nodes = Vec::new();
        for (i, port) in [1884u16, 1885, 1886].into_iter().enumerate() {
            let point = SyntheticPoint::new(10.0 * i as f64, 0.0);
            let host = Host::new("127.0.0.1", port);
            nodes.push(launcher.launch(&host, &LaunchSpec::Server { point }).await.unwrap());
        }

        nodes[0].write_line("remove_server").await.unwrap();
        let log = std::fs::read_to_string(dir.path().join("serversOutput.txt")).unwrap();
        assert_eq!(log.matches(NEW_SERVING_REGION).count(), 2);
        assert_eq!(launcher.sent("remove_server").len(), 1);
    }

    #[tokio::test]
    async fn refused_session() {
        let (_dir, launcher) = launcher().await;
        launcher.refuse_session("10.0.0.9");
        assert!(launcher.open_session(&Host::new("10.0.0.8", 1883)).await.is_ok());
        assert!(launcher.open_session(&Host::new("10.0.0.9", 1883)).await.is_err());
    }
}
