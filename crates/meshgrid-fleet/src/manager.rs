//! Node manager: owns the fleet, its hosts, brokers and placements.
//!
//! Setup order is fixed: hosts are allocated, a broker is brought up on
//! each host, the root node is started (a barrier), then regular nodes are
//! started concurrently. Every start blocks on a [`ReadinessGate`] for the
//! role's sentinel; there is no timeout on that wait.
//!
//! All state lives here and is mutated only from the caller's control
//! flow. Concurrent starts borrow the launcher, never the manager.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use mesh_core::{
    BlockCoords, ConfigError, Host, NodeCommand, NodeId, Role, ScriptConfig, SyntheticPoint,
    Transport, root_id, server_id,
};
use meshgrid_placement::{PlacementPoint, PlacementRegistry, PlannedNode, Planner, random_point};

use crate::context::OrchestratorContext;
use crate::error::{FleetError, FleetResult};
use crate::gate::ReadinessGate;
use crate::launcher::{LaunchSpec, Launcher};
use crate::observer::SentinelMatch;
use crate::process::NodeProcess;

const SETUP_START: &str = "####\nMesh Setup starting....\n####\n";
const SETUP_END: &str = "####\nMesh Setup has ended\n####\n\n";

/// Lifecycle of a fleet member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Launched, waiting for the ready sentinel.
    Provisioning,
    Ready,
    /// Shutdown requested, process not yet terminated.
    Terminating,
    /// Terminated and purged.
    Removed,
}

/// Initial fleet layout.
#[derive(Debug, Clone)]
pub enum Topology {
    /// `servers` nodes in total (root included) at random coordinates.
    Random { servers: u32, range: u32 },
    /// Explicit hosts and coordinates, or a random layout if the script
    /// asks for one.
    FromConfig(ScriptConfig),
}

/// Which host to allocate.
#[derive(Debug, Clone, PartialEq)]
pub enum HostRequest {
    Next,
    At { ip: String, port: u16 },
}

/// A live node.
pub struct FleetEntry {
    pub role: Role,
    pub host: Host,
    pub block: BlockCoords,
    pub point: SyntheticPoint,
    pub state: NodeState,
    process: Box<dyn NodeProcess>,
}

/// Starts a process and waits for its ready sentinel. The process is
/// terminated if it never becomes ready.
async fn start_process(
    launcher: &dyn Launcher,
    host: &Host,
    spec: LaunchSpec,
) -> FleetResult<Box<dyn NodeProcess>> {
    let role = spec.role();
    let mut process = launcher.launch(host, &spec).await?;
    let gate = ReadinessGate::bind(
        Box::new(SentinelMatch::new(role.ready_sentinel())),
        process.output(),
    );
    match gate.wait().await {
        Ok(_) => {
            info!(%host, %role, "process ready");
            Ok(process)
        }
        Err(e) => {
            warn!(%host, %role, error = %e, "process failed to become ready");
            if let Err(term) = process.terminate().await {
                debug!(%host, error = %term, "terminate after failed start");
            }
            Err(e.into())
        }
    }
}

/// Owner of the fleet: hosts, brokers, live nodes and their placements.
pub struct NodeManager {
    ctx: Arc<OrchestratorContext>,
    launcher: Arc<dyn Launcher>,
    range: u32,
    hosts: Vec<Host>,
    brokers: HashMap<Host, Box<dyn NodeProcess>>,
    fleet: HashMap<NodeId, FleetEntry>,
    placements: PlacementRegistry,
    root: Option<NodeId>,
    next_machine: usize,
}

impl NodeManager {
    pub fn new(ctx: Arc<OrchestratorContext>, launcher: Arc<dyn Launcher>, range: u32) -> Self {
        Self {
            ctx,
            launcher,
            range,
            hosts: Vec::new(),
            brokers: HashMap::new(),
            fleet: HashMap::new(),
            placements: PlacementRegistry::new(),
            root: None,
            next_machine: 0,
        }
    }

    // ── Setup ──────────────────────────────────────────────────────

    /// Bring up the initial fleet.
    pub async fn initialize(&mut self, topology: Topology) -> FleetResult<()> {
        self.ctx.sink.write_all(SETUP_START).await?;
        match topology {
            Topology::Random { servers, range } => {
                self.range = range;
                self.setup_random(servers).await?;
            }
            Topology::FromConfig(config) => {
                self.range = config.range;
                if config.transport() != self.transport() {
                    return Err(ConfigError::Topology(format!(
                        "script declares {} transport but nodes are launched with {}",
                        config.transport(),
                        self.transport()
                    ))
                    .into());
                }
                match config.random {
                    Some(servers) => self.setup_random(servers).await?,
                    None => self.setup_from_config(&config).await?,
                }
            }
        }
        self.ctx.sink.write_all(SETUP_END).await?;
        info!(nodes = self.fleet.len(), brokers = self.brokers.len(), "mesh setup complete");
        Ok(())
    }

    async fn setup_random(&mut self, servers: u32) -> FleetResult<()> {
        let total = servers.max(1) as usize;
        info!(nodes = total, range = self.range, "random mesh setup");
        let mut hosts = Vec::with_capacity(total);
        for _ in 0..total {
            hosts.push(self.allocate_host(HostRequest::Next).await?);
        }
        for host in &hosts {
            self.start_broker(host).await?;
        }
        self.start_root(random_point(self.range)).await?;
        self.add_server_bundle(hosts.split_off(1)).await?;
        Ok(())
    }

    async fn setup_from_config(&mut self, config: &ScriptConfig) -> FleetResult<()> {
        let Some(root_point) = config.root_point() else {
            return Err(ConfigError::Topology("root coordinates missing".into()).into());
        };
        info!(servers = config.servers_info.len(), "explicit mesh setup");

        let mut listed: Vec<Host> = config.root_host.iter().cloned().collect();
        listed.extend(config.servers_info.iter().map(|s| s.host()));
        let mut seen = HashSet::new();
        for host in &listed {
            self.check_transport(host)?;
            let key = match self.transport() {
                Transport::Local => Host::new(self.local_ip(&host.ip), host.port),
                Transport::Remote => host.clone(),
            };
            if !seen.insert(key) {
                return Err(ConfigError::Topology(format!("host {host} listed twice")).into());
            }
        }

        let transform = self.ctx.transform();
        let min = self.ctx.settings.placement.min_separation;
        let mut scratch = PlacementRegistry::new();
        let root_block = transform.to_block(root_point);
        scratch.add(PlacementPoint::new(root_id(root_block), root_block));
        for server in &config.servers_info {
            let block = transform.to_block(server.point());
            if !scratch.is_far_enough(block, min) {
                return Err(ConfigError::Topology(format!(
                    "server {} at ({}, {}) is closer than {min} blocks to another node",
                    server.host(),
                    server.coords[0],
                    server.coords[1]
                ))
                .into());
            }
            scratch.add(PlacementPoint::new(server_id(block), block));
        }

        let root_request = match &config.root_host {
            Some(h) => HostRequest::At {
                ip: h.ip.clone(),
                port: h.port,
            },
            None => HostRequest::Next,
        };
        let mut hosts = vec![self.allocate_host(root_request).await?];
        for server in &config.servers_info {
            let request = HostRequest::At {
                ip: server.ip.clone(),
                port: server.port,
            };
            hosts.push(self.allocate_host(request).await?);
        }
        for host in &hosts {
            self.start_broker(host).await?;
        }

        self.start_root(root_point).await?;

        let ctx = Arc::clone(&self.ctx);
        let planned: Vec<(Host, PlannedNode)> = hosts
            .split_off(1)
            .into_iter()
            .zip(&config.servers_info)
            .map(|(host, server)| {
                let point = server.point();
                let block = ctx.transform().to_block(point);
                let node_id = server_id(block);
                self.placements.add(PlacementPoint::new(node_id.clone(), block));
                (
                    host,
                    PlannedNode {
                        point,
                        block,
                        node_id,
                    },
                )
            })
            .collect();
        self.start_planned(planned).await?;
        Ok(())
    }

    // ── Hosts and brokers ──────────────────────────────────────────

    fn is_loopback(&self, ip: &str) -> bool {
        ip == self.ctx.settings.network.loopback || ip == "localhost" || ip.starts_with("127.")
    }

    fn check_transport(&self, host: &Host) -> FleetResult<()> {
        let transport = self.transport();
        let compatible = match transport {
            Transport::Local => self.is_loopback(&host.ip),
            Transport::Remote => !self.is_loopback(&host.ip),
        };
        if compatible {
            Ok(())
        } else {
            Err(ConfigError::IncompatibleHost {
                host: host.to_string(),
                transport: transport.to_string(),
            }
            .into())
        }
    }

    /// Loopback aliases collapse to the configured loopback address.
    fn local_ip(&self, ip: &str) -> String {
        if self.is_loopback(ip) {
            self.ctx.settings.network.loopback.clone()
        } else {
            ip.to_string()
        }
    }

    fn is_claimed(&self, ip: &str, port: u16) -> bool {
        self.hosts.iter().any(|h| h.ip == ip && h.port == port)
    }

    fn next_free_port(&self, ip: &str, start: u16, ceiling: u16) -> FleetResult<u16> {
        let mut port = start;
        while self.is_claimed(ip, port) {
            port = match port.checked_add(1) {
                Some(p) if p <= ceiling => p,
                _ => {
                    return Err(FleetError::ResourceExhausted {
                        ip: ip.to_string(),
                        ceiling,
                    });
                }
            };
        }
        if port > ceiling {
            return Err(FleetError::ResourceExhausted {
                ip: ip.to_string(),
                ceiling,
            });
        }
        Ok(port)
    }

    /// Claim a host for a new broker and node.
    ///
    /// Remote ports move up past claimed ones until the port ceiling, for
    /// explicit requests as well. A claimed local host is a config error.
    pub async fn allocate_host(&mut self, request: HostRequest) -> FleetResult<Host> {
        let network = &self.ctx.settings.network;
        let host = match (self.transport(), request) {
            (Transport::Local, HostRequest::Next) => {
                let start = network
                    .base_port
                    .saturating_add(u16::try_from(self.hosts.len()).unwrap_or(u16::MAX));
                let ip = network.loopback.clone();
                let port = self.next_free_port(&ip, start, u16::MAX)?;
                Host::new(ip, port)
            }
            (Transport::Remote, HostRequest::Next) => {
                let machines = &self.ctx.settings.remote.machines;
                if machines.is_empty() {
                    return Err(ConfigError::Topology("no remote machines configured".into()).into());
                }
                let ip = machines[self.next_machine % machines.len()].clone();
                self.next_machine += 1;
                let port = self.next_free_port(&ip, network.remote_port, network.port_ceiling)?;
                Host::new(ip, port)
            }
            (Transport::Local, HostRequest::At { ip, port }) => {
                let host = Host::new(self.local_ip(&ip), port);
                self.check_transport(&host)?;
                if self.is_claimed(&host.ip, host.port) {
                    return Err(ConfigError::Topology(format!("host {host} already allocated")).into());
                }
                host
            }
            (Transport::Remote, HostRequest::At { ip, port }) => {
                self.check_transport(&Host::new(ip.as_str(), port))?;
                let port = self.next_free_port(&ip, port, network.port_ceiling)?;
                Host::new(ip, port)
            }
        };
        self.launcher.open_session(&host).await?;
        debug!(%host, "host allocated");
        self.hosts.push(host.clone());
        Ok(host)
    }

    /// Make sure a broker runs on `host`. Idempotent.
    pub async fn start_broker(&mut self, host: &Host) -> FleetResult<()> {
        if self.brokers.contains_key(host) {
            return Ok(());
        }
        if self.launcher.broker_running(host).await {
            debug!(%host, "broker already running");
            return Ok(());
        }
        let process = start_process(self.launcher.as_ref(), host, LaunchSpec::Broker).await?;
        self.brokers.insert(host.clone(), process);
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    fn transition(&mut self, id: &str, state: NodeState) {
        debug!(node_id = %id, ?state, "node state");
        if let Some(entry) = self.fleet.get_mut(id) {
            entry.state = state;
        }
    }

    fn register(
        &mut self,
        id: NodeId,
        role: Role,
        host: Host,
        (point, block): (SyntheticPoint, BlockCoords),
        process: Box<dyn NodeProcess>,
    ) {
        self.fleet.insert(
            id.clone(),
            FleetEntry {
                role,
                host,
                block,
                point,
                state: NodeState::Ready,
                process,
            },
        );
        debug!(node_id = %id, state = ?NodeState::Ready, "node state");
    }

    /// Start the root node on the first host. Root placement is exempt
    /// from the separation check.
    pub async fn start_root(&mut self, point: SyntheticPoint) -> FleetResult<NodeId> {
        if let Some(id) = &self.root {
            return Err(FleetError::RootExists(id.clone()));
        }
        let host = match self.hosts.first().cloned() {
            Some(h) => h,
            None => self.allocate_host(HostRequest::Next).await?,
        };
        self.start_broker(&host).await?;

        let block = self.ctx.transform().to_block(point);
        let id = root_id(block);
        self.placements.add(PlacementPoint::new(id.clone(), block));
        debug!(node_id = %id, state = ?NodeState::Provisioning, "node state");

        let spec = LaunchSpec::Root { point };
        match start_process(self.launcher.as_ref(), &host, spec).await {
            Ok(process) => {
                self.register(id.clone(), Role::Root, host, (point, block), process);
                self.root = Some(id.clone());
                info!(node_id = %id, x = point.x, y = point.y, "root node started");
                Ok(id)
            }
            Err(e) => {
                self.placements.remove(&id);
                Err(e)
            }
        }
    }

    /// Start one regular node on an allocated host.
    pub async fn add_server(&mut self, host: &Host, point: SyntheticPoint) -> FleetResult<NodeId> {
        if self.root.is_none() {
            return Err(FleetError::RootMissing);
        }
        let block = self.ctx.transform().to_block(point);
        let id = server_id(block);
        if self.fleet.contains_key(&id) {
            return Err(FleetError::DuplicateNode(id));
        }
        let min = self.ctx.settings.placement.min_separation;
        if !self.placements.is_far_enough(block, min) {
            return Err(FleetError::PlacementConflict {
                x: point.x,
                y: point.y,
                min,
            });
        }

        self.placements.add(PlacementPoint::new(id.clone(), block));
        if let Err(e) = self.start_broker(host).await {
            self.placements.remove(&id);
            return Err(e);
        }
        debug!(node_id = %id, state = ?NodeState::Provisioning, "node state");
        match start_process(self.launcher.as_ref(), host, LaunchSpec::Server { point }).await {
            Ok(process) => {
                self.register(id.clone(), Role::Server, host.clone(), (point, block), process);
                info!(node_id = %id, %host, "server added");
                Ok(id)
            }
            Err(e) => {
                self.placements.remove(&id);
                Err(e)
            }
        }
    }

    /// Start one regular node per host at random valid coordinates.
    ///
    /// All placements are committed before any launch. Nodes that become
    /// ready are registered even if another start fails; the first failure
    /// is returned.
    pub async fn add_server_bundle(&mut self, hosts: Vec<Host>) -> FleetResult<Vec<NodeId>> {
        if hosts.is_empty() {
            return Ok(Vec::new());
        }
        if self.root.is_none() {
            return Err(FleetError::RootMissing);
        }
        let ctx = Arc::clone(&self.ctx);
        let placement = &ctx.settings.placement;
        let planner = Planner::new(
            ctx.transform(),
            self.range,
            placement.min_separation,
            placement.max_attempts,
        );
        let plan = planner.plan_bundle(&mut self.placements, hosts.len())?;

        for host in &hosts {
            if let Err(e) = self.start_broker(host).await {
                for node in &plan {
                    self.placements.remove(&node.node_id);
                }
                return Err(e);
            }
        }
        self.start_planned(hosts.into_iter().zip(plan).collect()).await
    }

    /// Launch regular nodes whose placements are already committed.
    async fn start_planned(
        &mut self,
        planned: Vec<(Host, PlannedNode)>,
    ) -> FleetResult<Vec<NodeId>> {
        let launcher = Arc::clone(&self.launcher);
        for (_, node) in &planned {
            debug!(node_id = %node.node_id, state = ?NodeState::Provisioning, "node state");
        }
        let starts = planned.iter().map(|(host, node)| {
            let launcher = launcher.as_ref();
            let spec = LaunchSpec::Server { point: node.point };
            async move { start_process(launcher, host, spec).await }
        });
        let outcomes = join_all(starts).await;

        let mut started = Vec::new();
        let mut first_error = None;
        for ((host, node), outcome) in planned.into_iter().zip(outcomes) {
            match outcome {
                Ok(process) => {
                    info!(node_id = %node.node_id, %host, "server added");
                    self.register(
                        node.node_id.clone(),
                        Role::Server,
                        host,
                        (node.point, node.block),
                        process,
                    );
                    started.push(node.node_id);
                }
                Err(e) => {
                    warn!(node_id = %node.node_id, %host, error = %e, "server start failed");
                    self.placements.remove(&node.node_id);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(started),
        }
    }

    /// Write one command line to a live node.
    pub async fn send(&mut self, id: &str, command: &NodeCommand) -> FleetResult<()> {
        let Some(entry) = self.fleet.get_mut(id) else {
            return Err(FleetError::UnknownNode(id.to_string()));
        };
        let line = command.to_string();
        debug!(node_id = %id, %line, "command sent");
        entry.process.write_line(&line).await
    }

    /// Remove a node: in-band shutdown, grace period, terminate, purge.
    /// Unknown ids are a silent no-op returning `false`.
    pub async fn remove_server(&mut self, id: &str) -> FleetResult<bool> {
        if !self.fleet.contains_key(id) {
            debug!(node_id = %id, "remove of unknown node ignored");
            return Ok(false);
        }
        self.transition(id, NodeState::Terminating);
        if let Err(e) = self.send(id, &NodeCommand::RemoveServer).await {
            warn!(node_id = %id, error = %e, "shutdown line not delivered");
        }
        tokio::time::sleep(self.ctx.removal_grace()).await;
        self.terminate_and_purge(id).await
    }

    /// Terminate a node's process and forget it. Returns `false` for
    /// unknown ids.
    pub async fn terminate_and_purge(&mut self, id: &str) -> FleetResult<bool> {
        let Some(mut entry) = self.fleet.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = entry.process.terminate().await {
            warn!(node_id = %id, error = %e, "terminate failed");
        }
        self.placements.remove(id);
        if self.root.as_deref() == Some(id) {
            self.root = None;
        }
        debug!(node_id = %id, state = ?NodeState::Removed, "node state");
        info!(node_id = %id, "node removed");
        Ok(true)
    }

    /// True iff the point keeps the minimum separation from every node.
    pub fn is_valid_location(&self, point: SyntheticPoint) -> bool {
        let block = self.ctx.transform().to_block(point);
        self.placements
            .is_far_enough(block, self.ctx.settings.placement.min_separation)
    }

    /// Terminate every node (regular nodes first), then every broker.
    pub async fn shutdown(&mut self) {
        let mut ids = self.regular_ids();
        ids.extend(self.root.clone());
        for id in ids {
            if let Err(e) = self.terminate_and_purge(&id).await {
                warn!(node_id = %id, error = %e, "shutdown of node failed");
            }
        }
        for (host, mut broker) in self.brokers.drain() {
            if let Err(e) = broker.terminate().await {
                warn!(%host, error = %e, "shutdown of broker failed");
            }
        }
        info!("fleet shut down");
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn context(&self) -> &Arc<OrchestratorContext> {
        &self.ctx
    }

    /// Live node ids, sorted.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.fleet.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Live non-root node ids, sorted.
    pub fn regular_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .fleet
            .iter()
            .filter(|(_, e)| e.role == Role::Server)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.fleet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fleet.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.fleet.contains_key(id)
    }

    pub fn entry(&self, id: &str) -> Option<&FleetEntry> {
        self.fleet.get(id)
    }

    pub fn node_state(&self, id: &str) -> Option<NodeState> {
        self.fleet.get(id).map(|e| e.state)
    }

    pub fn range(&self) -> u32 {
        self.range
    }

    pub fn transport(&self) -> Transport {
        self.launcher.transport()
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn placements(&self) -> &PlacementRegistry {
        &self.placements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedLauncher;
    use crate::sink::LogSink;
    use mesh_core::Settings;

    async fn manager(
        transport: Transport,
        settings: Settings,
    ) -> (tempfile::TempDir, ScriptedLauncher, NodeManager) {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path()).await.unwrap();
        let ctx = OrchestratorContext::new(settings, sink.clone());
        let launcher = ScriptedLauncher::new(transport, sink);
        let manager = NodeManager::new(ctx, Arc::new(launcher.clone()), 100);
        (dir, launcher, manager)
    }

    fn fast() -> Settings {
        let mut settings = Settings::default();
        settings.timing.removal_grace_ms = 1;
        settings
    }

    #[tokio::test]
    async fn local_hosts_skip_claimed_ports() {
        let (_dir, _launcher, mut mgr) = manager(Transport::Local, fast()).await;
        let first = mgr.allocate_host(HostRequest::Next).await.unwrap();
        assert_eq!(first, Host::new("127.0.0.1", 1883));

        let explicit = mgr
            .allocate_host(HostRequest::At {
                ip: "127.0.0.1".into(),
                port: 1884,
            })
            .await
            .unwrap();
        assert_eq!(explicit.port, 1884);

        // base + len = 1885
        let next = mgr.allocate_host(HostRequest::Next).await.unwrap();
        assert_eq!(next.port, 1885);

        let taken = mgr
            .allocate_host(HostRequest::At {
                ip: "127.0.0.1".into(),
                port: 1884,
            })
            .await;
        assert!(matches!(taken, Err(FleetError::Config(ConfigError::Topology(_)))));
    }

    #[tokio::test]
    async fn loopback_aliases_share_claims() {
        let (_dir, _launcher, mut mgr) = manager(Transport::Local, fast()).await;
        let aliased = mgr
            .allocate_host(HostRequest::At {
                ip: "localhost".into(),
                port: 1883,
            })
            .await
            .unwrap();
        assert_eq!(aliased, Host::new("127.0.0.1", 1883));

        let next = mgr.allocate_host(HostRequest::Next).await.unwrap();
        assert_eq!(next, Host::new("127.0.0.1", 1884));

        let taken = mgr
            .allocate_host(HostRequest::At {
                ip: "127.0.0.1".into(),
                port: 1883,
            })
            .await;
        assert!(matches!(taken, Err(FleetError::Config(ConfigError::Topology(_)))));
    }

    #[tokio::test]
    async fn remote_explicit_hosts_move_to_the_next_port() {
        let mut settings = fast();
        settings.network.port_ceiling = 1889;
        let (_dir, _launcher, mut mgr) = manager(Transport::Remote, settings).await;
        let at = |ip: &str, port| HostRequest::At {
            ip: ip.into(),
            port,
        };

        let first = mgr.allocate_host(at("10.0.0.1", 1883)).await.unwrap();
        assert_eq!(first, Host::new("10.0.0.1", 1883));
        let second = mgr.allocate_host(at("10.0.0.1", 1883)).await.unwrap();
        assert_eq!(second, Host::new("10.0.0.1", 1884));

        let err = mgr.allocate_host(at("10.0.0.2", 1950)).await.unwrap_err();
        assert!(matches!(err, FleetError::ResourceExhausted { ceiling: 1889, .. }));

        mgr.allocate_host(at("10.0.0.3", 1889)).await.unwrap();
        let err = mgr.allocate_host(at("10.0.0.3", 1889)).await.unwrap_err();
        assert!(matches!(err, FleetError::ResourceExhausted { .. }));
        assert_eq!(mgr.hosts().len(), 3);
    }

    #[tokio::test]
    async fn local_rejects_remote_ip() {
        let (_dir, _launcher, mut mgr) = manager(Transport::Local, fast()).await;
        let err = mgr
            .allocate_host(HostRequest::At {
                ip: "10.0.0.5".into(),
                port: 1883,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Config(ConfigError::IncompatibleHost { .. })));
        assert!(mgr.hosts().is_empty());
    }

    #[tokio::test]
    async fn remote_ports_hit_the_ceiling() {
        let mut settings = fast();
        settings.remote.machines = vec!["10.0.0.1".into()];
        settings.network.remote_port = 1883;
        settings.network.port_ceiling = 1884;
        let (_dir, _launcher, mut mgr) = manager(Transport::Remote, settings).await;

        assert_eq!(mgr.allocate_host(HostRequest::Next).await.unwrap().port, 1883);
        assert_eq!(mgr.allocate_host(HostRequest::Next).await.unwrap().port, 1884);
        let err = mgr.allocate_host(HostRequest::Next).await.unwrap_err();
        assert!(matches!(err, FleetError::ResourceExhausted { ceiling: 1884, .. }));
    }

    #[tokio::test]
    async fn remote_machines_round_robin_and_refusal() {
        let mut settings = fast();
        settings.remote.machines = vec!["10.0.0.1".into(), "10.0.0.2".into()];
        let (_dir, launcher, mut mgr) = manager(Transport::Remote, settings).await;
        launcher.refuse_session("10.0.0.2");

        assert_eq!(mgr.allocate_host(HostRequest::Next).await.unwrap().ip, "10.0.0.1");
        let err = mgr.allocate_host(HostRequest::Next).await.unwrap_err();
        assert!(matches!(err, FleetError::Session { .. }));
        assert_eq!(mgr.hosts().len(), 1);
    }

    #[tokio::test]
    async fn broker_start_is_idempotent() {
        let (_dir, launcher, mut mgr) = manager(Transport::Local, fast()).await;
        let host = mgr.allocate_host(HostRequest::Next).await.unwrap();
        mgr.start_broker(&host).await.unwrap();
        mgr.start_broker(&host).await.unwrap();
        assert_eq!(launcher.launch_count(Role::Broker), 1);

        let other = mgr.allocate_host(HostRequest::Next).await.unwrap();
        launcher.preset_broker(other.clone());
        mgr.start_broker(&other).await.unwrap();
        assert_eq!(launcher.launch_count(Role::Broker), 1);
    }

    #[tokio::test]
    async fn server_needs_root() {
        let (_dir, _launcher, mut mgr) = manager(Transport::Local, fast()).await;
        let host = mgr.allocate_host(HostRequest::Next).await.unwrap();
        let err = mgr.add_server(&host, SyntheticPoint::new(1.0, 1.0)).await.unwrap_err();
        assert!(matches!(err, FleetError::RootMissing));
    }

    #[tokio::test]
    async fn add_and_remove_server() {
        let (_dir, launcher, mut mgr) = manager(Transport::Local, fast()).await;
        let root = mgr.start_root(SyntheticPoint::new(50.0, 50.0)).await.unwrap();
        assert_eq!(root, "SB_Root_50_50");
        assert!(matches!(
            mgr.start_root(SyntheticPoint::new(1.0, 1.0)).await,
            Err(FleetError::RootExists(_))
        ));

        let host = mgr.allocate_host(HostRequest::Next).await.unwrap();
        let near = mgr.add_server(&host, SyntheticPoint::new(52.0, 50.0)).await;
        assert!(matches!(near, Err(FleetError::PlacementConflict { .. })));

        let id = mgr.add_server(&host, SyntheticPoint::new(10.0, 10.0)).await.unwrap();
        assert_eq!(id, "SBS_10_10");
        assert_eq!(mgr.node_state(&id), Some(NodeState::Ready));
        assert!(!mgr.is_valid_location(SyntheticPoint::new(12.0, 12.0)));

        assert!(mgr.remove_server(&id).await.unwrap());
        assert!(!mgr.contains(&id));
        assert!(mgr.is_valid_location(SyntheticPoint::new(12.0, 12.0)));
        assert_eq!(launcher.sent("remove_server").len(), 1);
        assert_eq!(launcher.terminated(), vec!["server@127.0.0.1:1884"]);
    }

    #[tokio::test]
    async fn failed_start_releases_placement() {
        let (_dir, launcher, mut mgr) = manager(Transport::Local, fast()).await;
        mgr.start_root(SyntheticPoint::new(0.0, 0.0)).await.unwrap();
        let point = SyntheticPoint::new(30.0, 30.0);
        launcher.fail_at(point);

        let host = mgr.allocate_host(HostRequest::Next).await.unwrap();
        let err = mgr.add_server(&host, point).await.unwrap_err();
        assert!(matches!(err, FleetError::Readiness(_)));
        assert!(mgr.is_valid_location(point));
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_terminates_everything() {
        let (_dir, launcher, mut mgr) = manager(Transport::Local, fast()).await;
        mgr.initialize(Topology::Random {
            servers: 3,
            range: 100,
        })
        .await
        .unwrap();
        mgr.shutdown().await;

        assert!(mgr.is_empty());
        assert_eq!(mgr.broker_count(), 0);
        assert!(mgr.root_id().is_none());
        let terminated = launcher.terminated();
        assert_eq!(terminated.len(), 6);
        assert!(terminated[2].starts_with("root@"));
    }
}
