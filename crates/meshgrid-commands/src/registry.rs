//! Command registry: validates and executes catalog commands.
//!
//! # Execution
//!
//! Every primitive writes a timestamped banner to all log files, sends one
//! line to the source node, waits on the completion probe, and closes with
//! an "execution is over" banner. Derived commands iterate primitives over
//! a snapshot of the fleet ids and add nothing of their own.
//!
//! # Validation
//!
//! A batch is validated as a whole before anything runs. Referenced ids
//! are checked against the fleet as the batch will have shaped it:
//! `addServerInteractive` adds the id derived from its coordinates and
//! `removeServer` drops one. Bundles place nodes at random, so after a
//! bundle any regular id is admitted. Ids are checked again when each
//! command executes. `removeServer` of an absent id is a silent no-op.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use mesh_core::{
    Command, CoordinateTransform, Host, NodeCommand, NodeId, SyntheticPoint, is_root_id, server_id,
};
use meshgrid_fleet::{FleetError, HostRequest, NodeManager, OrchestratorContext};

use crate::catalog::{CommandSpec, Invocation, Scope, catalog};
use crate::error::{CommandError, CommandResult};
use crate::probe::{CompletionProbe, FixedSettle};

/// Fleet membership as a batch will leave it, one command at a time.
struct ExpectedFleet {
    ids: HashSet<NodeId>,
    /// A bundle ran earlier in the batch.
    bundled: bool,
}

impl ExpectedFleet {
    fn of(manager: &NodeManager) -> Self {
        Self {
            ids: manager.ids().into_iter().collect(),
            bundled: false,
        }
    }

    fn admit(&self, invocation: &Invocation) -> CommandResult<()> {
        for id in invocation.referenced_ids() {
            let known = self.ids.contains(id) || (self.bundled && !is_root_id(id));
            if !known {
                return Err(CommandError::UnavailableServer(id.to_string()));
            }
        }
        Ok(())
    }

    fn apply(&mut self, invocation: &Invocation, transform: &dyn CoordinateTransform) {
        match invocation {
            Invocation::AddServer { point, .. } => {
                self.ids.insert(server_id(transform.to_block(*point)));
            }
            Invocation::RemoveServer { id } => {
                self.ids.remove(id);
            }
            Invocation::AddServerBundle { .. } => self.bundled = true,
            _ => {}
        }
    }
}

/// Owns the fleet for the duration of a run and drives it with commands.
pub struct CommandRegistry {
    pub(crate) manager: NodeManager,
    pub(crate) ctx: Arc<OrchestratorContext>,
    catalog: BTreeMap<&'static str, CommandSpec>,
    probe: Box<dyn CompletionProbe>,
}

impl CommandRegistry {
    pub fn new(manager: NodeManager) -> Self {
        let ctx = Arc::clone(manager.context());
        Self {
            manager,
            ctx,
            catalog: catalog(),
            probe: Box::new(FixedSettle),
        }
    }

    pub fn with_completion_probe(mut self, probe: Box<dyn CompletionProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn manager(&self) -> &NodeManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut NodeManager {
        &mut self.manager
    }

    pub fn into_manager(self) -> NodeManager {
        self.manager
    }

    pub fn spec(&self, name: &str) -> Option<&CommandSpec> {
        self.catalog.get(name)
    }

    pub fn catalog(&self) -> impl Iterator<Item = &CommandSpec> {
        self.catalog.values()
    }

    fn scope(&self) -> Scope {
        Scope {
            range: self.manager.range(),
            transport: self.manager.transport(),
        }
    }

    // ── Validation ─────────────────────────────────────────────────

    /// Catalog lookup and argument parsing only; the fleet is not consulted.
    pub fn parse(&self, command: &Command) -> CommandResult<Invocation> {
        let Some(spec) = self.catalog.get(command.cmd.as_str()) else {
            return Err(CommandError::InvalidCommand(command.cmd.clone()));
        };
        spec.parse(self.scope(), &command.args)
    }

    /// Parse one command and check its ids against the live fleet.
    pub fn validate(&self, command: &Command) -> CommandResult<Invocation> {
        let invocation = self.parse(command)?;
        ExpectedFleet::of(&self.manager).admit(&invocation)?;
        Ok(invocation)
    }

    /// Validate a whole batch against the fleet it will run on. The first
    /// failure aborts.
    pub fn validate_commands(&self, commands: &[Command]) -> CommandResult<Vec<Invocation>> {
        let mut expected = ExpectedFleet::of(&self.manager);
        let mut invocations = Vec::with_capacity(commands.len());
        for command in commands {
            let invocation = self.parse(command)?;
            expected.admit(&invocation)?;
            expected.apply(&invocation, self.ctx.transform());
            invocations.push(invocation);
        }
        Ok(invocations)
    }

    /// Parse a whole batch without looking at the fleet.
    pub fn parse_commands(&self, commands: &[Command]) -> CommandResult<Vec<Invocation>> {
        commands.iter().map(|c| self.parse(c)).collect()
    }

    /// Validate, then execute one command.
    pub async fn run(&mut self, command: &Command) -> CommandResult<()> {
        let invocation = self.validate(command)?;
        info!(command = %command.cmd, "running command");
        self.execute(invocation).await
    }

    /// Validate every command, then execute them in order.
    pub async fn run_batch(&mut self, commands: &[Command]) -> CommandResult<()> {
        let invocations = self.validate_commands(commands)?;
        info!(commands = invocations.len(), "batch validated");
        for (command, invocation) in commands.iter().zip(invocations) {
            debug!(command = %command.cmd, "batch step");
            self.execute(invocation).await?;
        }
        Ok(())
    }

    // ── Execution ──────────────────────────────────────────────────

    pub async fn execute(&mut self, invocation: Invocation) -> CommandResult<()> {
        match invocation {
            Invocation::AddServer { point, host } => self.add_server(point, host).await,
            Invocation::AddServerBundle { count, hosts } => {
                self.add_server_bundle(count, hosts).await
            }
            Invocation::RemoveServer { id } => self.remove_server(&id).await,
            Invocation::SingularQuery { src, dest } => {
                self.require(&[src.as_str(), dest.as_str()])?;
                self.primitive(&src, NodeCommand::Query { target: dest })
                    .await
            }
            Invocation::SingularRegion { src, dest } => {
                self.require(&[src.as_str(), dest.as_str()])?;
                self.primitive(&src, NodeCommand::ServingRegion { target: dest })
                    .await
            }
            Invocation::PingBlock {
                src,
                x,
                y,
                message,
                repeat,
            } => {
                self.require(&[src.as_str()])?;
                let command = NodeCommand::PingBlock {
                    x,
                    y,
                    message,
                    repeat,
                };
                self.primitive(&src, command).await
            }
            Invocation::PingRegion {
                src,
                x_start,
                x_end,
                y_start,
                y_end,
                message,
                repeat,
            } => {
                self.require(&[src.as_str()])?;
                let command = NodeCommand::PingRegion {
                    x_start,
                    x_end,
                    y_start,
                    y_end,
                    message,
                    repeat,
                };
                self.primitive(&src, command).await
            }
            Invocation::ExhaustiveQuery => {
                let ids = self.manager.ids();
                for src in &ids {
                    self.query_all(src, &ids, |target| NodeCommand::Query { target })
                        .await?;
                }
                Ok(())
            }
            Invocation::GroupQuery { src } => {
                self.require(&[src.as_str()])?;
                let ids = self.manager.ids();
                self.query_all(&src, &ids, |target| NodeCommand::Query { target })
                    .await
            }
            Invocation::ExhaustiveRegion => {
                let ids = self.manager.ids();
                for src in &ids {
                    self.query_all(src, &ids, |target| NodeCommand::ServingRegion { target })
                        .await?;
                }
                Ok(())
            }
            Invocation::GroupRegion { src } => {
                self.require(&[src.as_str()])?;
                let ids = self.manager.ids();
                self.query_all(&src, &ids, |target| NodeCommand::ServingRegion { target })
                    .await
            }
            Invocation::Performance1 {
                interval_ms,
                duration_ms,
            } => self.performance_1(interval_ms, duration_ms).await,
            Invocation::Performance2 {
                interval_ms,
                duration_ms,
                servers,
            } => self.performance_2(interval_ms, duration_ms, servers).await,
            Invocation::Performance5 => self.performance_5().await,
            Invocation::Performance6 => self.performance_6().await,
        }
    }

    fn require(&self, ids: &[&str]) -> CommandResult<()> {
        match ids.iter().find(|id| !self.manager.contains(id)) {
            Some(missing) => Err(CommandError::UnavailableServer(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Banner, one line to `src`, settle, closing banner.
    pub(crate) async fn primitive(&mut self, src: &str, command: NodeCommand) -> CommandResult<()> {
        self.ctx
            .stamp(&format!("{command} --- executed from {src} server"))
            .await?;
        self.manager.send(src, &command).await?;
        self.probe.wait(src, &command, self.ctx.settle_delay()).await;
        self.ctx.over().await?;
        Ok(())
    }

    async fn query_all(
        &mut self,
        src: &str,
        targets: &[String],
        make: impl Fn(String) -> NodeCommand,
    ) -> CommandResult<()> {
        for target in targets {
            self.require(&[src, target.as_str()])?;
            self.primitive(src, make(target.clone())).await?;
        }
        Ok(())
    }

    async fn add_server(&mut self, point: SyntheticPoint, host: Option<Host>) -> CommandResult<()> {
        if !self.manager.is_valid_location(point) {
            return Err(FleetError::PlacementConflict {
                x: point.x,
                y: point.y,
                min: self.ctx.settings.placement.min_separation,
            }
            .into());
        }
        let request = match host {
            Some(h) => HostRequest::At {
                ip: h.ip,
                port: h.port,
            },
            None => HostRequest::Next,
        };
        let host = self.manager.allocate_host(request).await?;
        self.manager.start_broker(&host).await?;

        let block = self.ctx.transform().to_block(point);
        self.ctx
            .stamp(&format!(
                "Add server --- adding a server on {}, {} block on port {}",
                block.col, block.row, host.port
            ))
            .await?;
        self.manager.add_server(&host, point).await?;
        self.ctx.over().await?;
        Ok(())
    }

    async fn add_server_bundle(&mut self, count: usize, hosts: Option<Vec<Host>>) -> CommandResult<()> {
        let requests: Vec<HostRequest> = match hosts {
            Some(hosts) => hosts
                .into_iter()
                .map(|h| HostRequest::At {
                    ip: h.ip,
                    port: h.port,
                })
                .collect(),
            None => vec![HostRequest::Next; count],
        };
        let mut allocated = Vec::with_capacity(requests.len());
        for request in requests {
            allocated.push(self.manager.allocate_host(request).await?);
        }

        self.ctx
            .stamp(&format!(
                "Add server bundle --- number of servers to add: {count}"
            ))
            .await?;
        let ids = self.manager.add_server_bundle(allocated).await?;
        info!(added = ids.len(), "server bundle added");
        self.ctx.over().await?;
        Ok(())
    }

    /// Removing an absent node does nothing, not even a banner.
    async fn remove_server(&mut self, id: &str) -> CommandResult<()> {
        if !self.manager.contains(id) {
            warn!(node_id = %id, "remove of absent node ignored");
            return Ok(());
        }
        self.ctx.stamp(&format!("remove_server {id}")).await?;
        self.manager.remove_server(id).await?;
        self.ctx.over().await?;
        Ok(())
    }
}
