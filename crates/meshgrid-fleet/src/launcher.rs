//! Launchers: turn a launch request into a running [`NodeProcess`].
//!
//! A launcher knows how to reach a host (local child processes or remote
//! sessions), how to tell whether a broker already listens there, and how
//! to render the broker, root and server command templates.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use mesh_core::{Host, Role, SyntheticPoint, Transport, render_command};

use crate::context::OrchestratorContext;
use crate::error::{FleetError, FleetResult};
use crate::process::{LocalProcess, NodeProcess, RemoteSession};

/// What to launch on a host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaunchSpec {
    Broker,
    Root { point: SyntheticPoint },
    Server { point: SyntheticPoint },
}

impl LaunchSpec {
    pub fn role(&self) -> Role {
        match self {
            LaunchSpec::Broker => Role::Broker,
            LaunchSpec::Root { .. } => Role::Root,
            LaunchSpec::Server { .. } => Role::Server,
        }
    }
}

/// Provisioning seam between the node manager and the machines.
#[async_trait]
pub trait Launcher: Send + Sync {
    fn transport(&self) -> Transport;

    /// Make sure `host` can be reached before it is handed out.
    async fn open_session(&self, host: &Host) -> FleetResult<()>;

    /// Whether a broker already listens on `host`. A failed probe counts
    /// as "not running".
    async fn broker_running(&self, host: &Host) -> bool;

    async fn launch(&self, host: &Host, spec: &LaunchSpec) -> FleetResult<Box<dyn NodeProcess>>;
}

fn coord(value: f64) -> String {
    value.to_string()
}

fn vars(host: &Host, spec: &LaunchSpec) -> Vec<(&'static str, String)> {
    let mut vars = vec![("ip", host.ip.clone()), ("port", host.port.to_string())];
    if let LaunchSpec::Root { point } | LaunchSpec::Server { point } = spec {
        vars.push(("x", coord(point.x)));
        vars.push(("y", coord(point.y)));
    }
    vars
}

/// True if a `ps` line runs `command` with nothing glued to its last word.
fn runs_command(line: &str, command: &str) -> bool {
    line.match_indices(command).any(|(at, _)| {
        line[at + command.len()..]
            .chars()
            .next()
            .is_none_or(char::is_whitespace)
    })
}

/// True if a `netstat -an` line is a listener bound to exactly `port`.
fn listens_on(line: &str, port: u16) -> bool {
    let port = port.to_string();
    line.contains("LISTEN")
        && line
            .split_whitespace()
            .filter_map(|field| field.rsplit_once([':', '.']))
            .any(|(_, p)| p == port)
}

// ── Local ──────────────────────────────────────────────────────────

/// Launches child processes on this machine.
pub struct LocalLauncher {
    ctx: Arc<OrchestratorContext>,
}

impl LocalLauncher {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self { ctx }
    }

    fn argv(&self, host: &Host, spec: &LaunchSpec) -> Vec<String> {
        let programs = &self.ctx.settings.programs;
        let template = match spec {
            LaunchSpec::Broker => &programs.broker_local,
            LaunchSpec::Root { .. } => &programs.root,
            LaunchSpec::Server { .. } => &programs.server,
        };
        render_command(template, &vars(host, spec))
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    fn transport(&self) -> Transport {
        Transport::Local
    }

    async fn open_session(&self, _host: &Host) -> FleetResult<()> {
        Ok(())
    }

    async fn broker_running(&self, host: &Host) -> bool {
        let needle = self.argv(host, &LaunchSpec::Broker).join(" ");
        match Command::new("ps").arg("aux").stdin(Stdio::null()).output().await {
            Ok(out) => String::from_utf8_lossy(&out.stdout)
                .lines()
                .any(|line| runs_command(line, &needle)),
            Err(e) => {
                debug!(%host, error = %e, "broker probe failed");
                false
            }
        }
    }

    async fn launch(&self, host: &Host, spec: &LaunchSpec) -> FleetResult<Box<dyn NodeProcess>> {
        let argv = self.argv(host, spec);
        info!(%host, role = %spec.role(), command = %argv.join(" "), "launching local process");
        let process = LocalProcess::spawn(&argv, spec.role(), host, &self.ctx.sink)?;
        Ok(Box::new(process))
    }
}

// ── Remote ─────────────────────────────────────────────────────────

/// Launches processes on remote machines through the system `ssh` client.
pub struct RemoteLauncher {
    ctx: Arc<OrchestratorContext>,
}

impl RemoteLauncher {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self { ctx }
    }

    /// Session client invocation up to and including the destination.
    fn client(&self, host: &Host) -> FleetResult<Vec<String>> {
        let remote = &self.ctx.settings.remote;
        let Some(user) = remote.user.as_deref() else {
            return Err(FleetError::Session {
                host: host.to_string(),
                reason: "no remote user configured".into(),
            });
        };
        let mut argv = vec![
            self.ctx.settings.programs.ssh.clone(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(key) = &remote.identity_file {
            argv.push("-i".to_string());
            argv.push(key.clone());
        }
        argv.push(format!("{user}@{}", host.ip));
        Ok(argv)
    }

    fn remote_command(&self, host: &Host, spec: &LaunchSpec) -> String {
        let programs = &self.ctx.settings.programs;
        let template = match spec {
            LaunchSpec::Broker => &programs.broker_remote,
            LaunchSpec::Root { .. } => &programs.remote_root,
            LaunchSpec::Server { .. } => &programs.remote_server,
        };
        render_command(template, &vars(host, spec)).join(" ")
    }

    async fn run(&self, host: &Host, remote: &str) -> FleetResult<std::process::Output> {
        let client = self.client(host)?;
        let Some((program, args)) = client.split_first() else {
            return Err(FleetError::Session {
                host: host.to_string(),
                reason: "empty session client".into(),
            });
        };
        let output = Command::new(program)
            .args(args)
            .arg(remote)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(output)
    }
}

#[async_trait]
impl Launcher for RemoteLauncher {
    fn transport(&self) -> Transport {
        Transport::Remote
    }

    async fn open_session(&self, host: &Host) -> FleetResult<()> {
        let output = self.run(host, "true").await?;
        if output.status.success() {
            debug!(%host, "session negotiated");
            Ok(())
        } else {
            let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(%host, %reason, "session refused");
            Err(FleetError::Session {
                host: host.to_string(),
                reason,
            })
        }
    }

    async fn broker_running(&self, host: &Host) -> bool {
        let probe = format!("netstat -an | grep :{}", host.port);
        match self.run(host, &probe).await {
            Ok(out) => String::from_utf8_lossy(&out.stdout)
                .lines()
                .any(|line| listens_on(line, host.port)),
            Err(e) => {
                debug!(%host, error = %e, "broker probe failed");
                false
            }
        }
    }

    async fn launch(&self, host: &Host, spec: &LaunchSpec) -> FleetResult<Box<dyn NodeProcess>> {
        let client = self.client(host)?;
        let remote = format!("bash -lc '{}'", self.remote_command(host, spec));
        info!(%host, role = %spec.role(), command = %remote, "launching remote process");
        let session = RemoteSession::open(&client, &remote, spec.role(), host, &self.ctx.sink)?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::LogSink;
    use mesh_core::Settings;

    async fn context(settings: Settings) -> (tempfile::TempDir, Arc<OrchestratorContext>) {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path()).await.unwrap();
        (dir, OrchestratorContext::new(settings, sink))
    }

    #[tokio::test]
    async fn local_templates_are_rendered() {
        let (_dir, ctx) = context(Settings::default()).await;
        let launcher = LocalLauncher::new(ctx);
        let host = Host::new("127.0.0.1", 1884);

        assert_eq!(
            launcher.argv(&host, &LaunchSpec::Broker),
            vec!["mosquitto", "-p", "1884"]
        );
        let server = LaunchSpec::Server {
            point: SyntheticPoint::new(12.0, 40.0),
        };
        assert_eq!(
            launcher.argv(&host, &server).join(" "),
            "node ../src/proxies/serverProxy 127.0.0.1 1884 12 40"
        );
    }

    #[test]
    fn process_scan_matches_whole_ports() {
        assert!(runs_command("alice 4242 0.0 mosquitto -p 1884", "mosquitto -p 1884"));
        assert!(runs_command("alice 4242 0.0 mosquitto -p 1884 -v", "mosquitto -p 1884"));
        assert!(!runs_command("alice 4242 0.0 mosquitto -p 18840", "mosquitto -p 1884"));
    }

    #[test]
    fn listener_scan_matches_whole_ports() {
        let port = 1883;
        assert!(listens_on("tcp   0  0 0.0.0.0:1883   0.0.0.0:*   LISTEN", port));
        assert!(listens_on("tcp6  0  0 :::1883        :::*        LISTEN", port));
        assert!(listens_on("tcp4  0  0 *.1883         *.*         LISTEN", port));
        assert!(!listens_on("tcp   0  0 0.0.0.0:18830  0.0.0.0:*   LISTEN", port));
        assert!(!listens_on("tcp   0  0 10.0.0.1:1883  10.0.0.2:5000 ESTABLISHED", port));
    }

    #[tokio::test]
    async fn remote_client_needs_a_user() {
        let (_dir, ctx) = context(Settings::default()).await;
        let launcher = RemoteLauncher::new(ctx);
        let err = launcher.client(&Host::new("10.0.0.7", 1883)).unwrap_err();
        assert!(matches!(err, FleetError::Session { .. }));
    }

    #[tokio::test]
    async fn remote_client_and_command() {
        let mut settings = Settings::default();
        settings.remote.user = Some("mesh".into());
        settings.remote.identity_file = Some("~/.ssh/mesh".into());
        let (_dir, ctx) = context(settings).await;
        let launcher = RemoteLauncher::new(ctx);
        let host = Host::new("10.0.0.7", 1885);

        assert_eq!(
            launcher.client(&host).unwrap(),
            vec!["ssh", "-o", "BatchMode=yes", "-i", "~/.ssh/mesh", "mesh@10.0.0.7"]
        );
        assert_eq!(
            launcher.remote_command(&host, &LaunchSpec::Broker),
            "mosquitto -c ~/SpaceBase/mosquitto/dist_conf_1885.conf"
        );
    }
}
