//! Orchestrator settings (`mesh.toml`) and scripted run files (JSON).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Host, SyntheticPoint, Transport};

// ── Settings ───────────────────────────────────────────────────────

/// Static settings for one orchestrator run.
///
/// Every section is optional in the file; missing values take the
/// defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub network: NetworkConfig,
    pub remote: RemoteConfig,
    pub programs: ProgramsConfig,
    pub timing: TimingConfig,
    pub placement: PlacementConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address used for every local host.
    pub loopback: String,
    /// Port of the first local host (the root's broker).
    pub base_port: u16,
    /// First port tried on a remote machine.
    pub remote_port: u16,
    /// Highest port a remote allocation may use.
    pub port_ceiling: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            loopback: "127.0.0.1".to_string(),
            base_port: 1883,
            remote_port: 1883,
            port_ceiling: 1889,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Login used for remote sessions.
    pub user: Option<String>,
    /// Private key passed to the session client.
    pub identity_file: Option<String>,
    /// Machines hosts are drawn from, in order.
    pub machines: Vec<String>,
}

/// Command templates. `{port}`, `{ip}`, `{x}` and `{y}` are substituted
/// before the template is split on whitespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramsConfig {
    pub broker_local: String,
    pub broker_remote: String,
    pub root: String,
    pub server: String,
    pub remote_root: String,
    pub remote_server: String,
    /// Session client binary for remote transport.
    pub ssh: String,
}

impl Default for ProgramsConfig {
    fn default() -> Self {
        Self {
            broker_local: "mosquitto -p {port}".to_string(),
            broker_remote: "mosquitto -c ~/SpaceBase/mosquitto/dist_conf_{port}.conf".to_string(),
            root: "node ../src/proxies/rootProxy {x} {y}".to_string(),
            server: "node ../src/proxies/serverProxy {ip} {port} {x} {y}".to_string(),
            remote_root: "node ~/SpaceBase/src/proxies/rootProxy {x} {y}".to_string(),
            remote_server: "node ~/SpaceBase/src/proxies/serverProxy {ip} {port} {x} {y}".to_string(),
            ssh: "ssh".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Fixed delay after writing a command to a node.
    pub settle_ms: u64,
    /// Delay between the in-band shutdown line and the forced terminate.
    pub removal_grace_ms: u64,
    /// Poll interval when waiting on the aggregate logs.
    pub log_poll_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 100,
            removal_grace_ms: 100,
            log_poll_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Minimum block distance between two live nodes.
    pub min_separation: f64,
    /// Synthetic units per placement block.
    pub block_size: f64,
    /// Random coordinate draws before giving up on a placement.
    pub max_attempts: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            min_separation: 6.0,
            block_size: 1.0,
            max_attempts: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory holding one `exec_<tag>` folder per run.
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "Output".to_string(),
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = read(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load from `path` if given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }
}

/// Substitute `{name}` placeholders and split into program + arguments.
pub fn render_command(template: &str, vars: &[(&str, String)]) -> Vec<String> {
    let mut rendered = template.to_string();
    for (name, value) in vars {
        rendered = rendered.replace(&format!("{{{name}}}"), value);
    }
    rendered.split_whitespace().map(str::to_string).collect()
}

// ── Scripted runs ──────────────────────────────────────────────────

/// A command as written in a script or typed at the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl Command {
    pub fn new(cmd: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            cmd: cmd.into(),
            args,
        }
    }
}

/// One explicitly placed regular node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub ip: String,
    pub port: u16,
    pub coords: [f64; 2],
}

impl ServerInfo {
    pub fn host(&self) -> Host {
        Host::new(self.ip.clone(), self.port)
    }

    pub fn point(&self) -> SyntheticPoint {
        SyntheticPoint::new(self.coords[0], self.coords[1])
    }
}

/// A scripted run: topology plus an optional command list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    pub range: u32,
    /// Run `commands` unattended and exit.
    #[serde(default)]
    pub test: bool,
    #[serde(default = "default_local")]
    pub local_host: bool,
    /// Random topology with this many nodes (root included).
    #[serde(default)]
    pub random: Option<u32>,
    #[serde(default)]
    pub servers_info: Vec<ServerInfo>,
    #[serde(default)]
    pub root_coords: Option<[f64; 2]>,
    #[serde(default)]
    pub root_host: Option<Host>,
    #[serde(default)]
    pub commands: Vec<Command>,
}

fn default_local() -> bool {
    true
}

impl ScriptConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = read(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: ScriptConfig = serde_json::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn transport(&self) -> Transport {
        if self.local_host {
            Transport::Local
        } else {
            Transport::Remote
        }
    }

    pub fn root_point(&self) -> Option<SyntheticPoint> {
        self.root_coords.map(|c| SyntheticPoint::new(c[0], c[1]))
    }

    fn check(&self) -> ConfigResult<()> {
        if self.range == 0 {
            return Err(ConfigError::Topology("range must be positive".into()));
        }
        if self.random.is_some() {
            return Ok(());
        }
        let Some(root) = self.root_point() else {
            return Err(ConfigError::Topology(
                "either `random` or `rootCoords` must be given".into(),
            ));
        };
        let range = f64::from(self.range);
        let in_range = |p: SyntheticPoint| (0.0..=range).contains(&p.x) && (0.0..=range).contains(&p.y);
        if !in_range(root) {
            return Err(ConfigError::Topology(format!(
                "root coordinates ({}, {}) outside 0 - {}",
                root.x, root.y, self.range
            )));
        }
        if let Some(bad) = self.servers_info.iter().find(|s| !in_range(s.point())) {
            return Err(ConfigError::Topology(format!(
                "server {}:{} coordinates outside 0 - {}",
                bad.ip, bad.port, self.range
            )));
        }
        Ok(())
    }
}

fn read(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}
