use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tracing::{info, warn};

use mesh_core::{ScriptConfig, Settings, Transport};
use meshgrid_commands::CommandRegistry;
use meshgrid_fleet::{
    Launcher, LocalLauncher, LogSink, NodeManager, OrchestratorContext, RemoteLauncher,
    ScriptedLauncher, Topology,
};

use super::shell;

/// Flags shared by every run.
pub struct RunOptions {
    pub settings: Option<PathBuf>,
    pub dry_run: bool,
}

pub(crate) fn run_tag() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
        .to_string()
}

async fn build_manager(
    opts: &RunOptions,
    transport: Transport,
    range: u32,
    tag: &str,
) -> anyhow::Result<NodeManager> {
    let settings = Settings::load(opts.settings.as_deref())?;
    let sink = LogSink::for_run(Path::new(&settings.output.dir), tag)
        .await
        .context("creating run output directory")?;
    info!(dir = %sink.dir().display(), %transport, dry_run = opts.dry_run, "run output");

    let ctx = OrchestratorContext::new(settings, sink.clone());
    let launcher: Arc<dyn Launcher> = if opts.dry_run {
        Arc::new(ScriptedLauncher::new(transport, sink))
    } else {
        match transport {
            Transport::Local => Arc::new(LocalLauncher::new(Arc::clone(&ctx))),
            Transport::Remote => Arc::new(RemoteLauncher::new(Arc::clone(&ctx))),
        }
    };
    Ok(NodeManager::new(ctx, launcher, range))
}

/// Bring up the initial fleet. On failure whatever did start is torn down.
async fn bring_up(registry: &mut CommandRegistry, topology: Topology) -> anyhow::Result<()> {
    if let Err(e) = registry.manager_mut().initialize(topology).await {
        warn!(error = %e, "mesh setup failed, shutting down");
        registry.manager_mut().shutdown().await;
        return Err(e).context("mesh setup");
    }
    Ok(())
}

pub async fn random(opts: &RunOptions, servers: u32, range: u32, remote: bool) -> anyhow::Result<()> {
    let transport = if remote {
        Transport::Remote
    } else {
        Transport::Local
    };
    let manager = build_manager(opts, transport, range, &run_tag()).await?;
    let mut registry = CommandRegistry::new(manager);
    bring_up(&mut registry, Topology::Random { servers, range }).await?;

    let outcome = shell::interactive(&mut registry).await;
    registry.into_manager().shutdown().await;
    outcome
}

pub async fn script(opts: &RunOptions, path: &Path) -> anyhow::Result<()> {
    let config = ScriptConfig::from_file(path)?;
    run_script(opts, config, &run_tag()).await.map(|_| ())
}

/// Run a script config under `tag`. Returns the run's output directory.
pub(crate) async fn run_script(
    opts: &RunOptions,
    config: ScriptConfig,
    tag: &str,
) -> anyhow::Result<PathBuf> {
    let manager = build_manager(opts, config.transport(), config.range, tag).await?;
    let dir = manager.context().sink.dir().to_path_buf();
    let mut registry = CommandRegistry::new(manager);

    let test = config.test;
    let commands = config.commands.clone();
    if test {
        registry.parse_commands(&commands)?;
        info!(commands = commands.len(), "script commands parsed");
    }
    bring_up(&mut registry, Topology::FromConfig(config)).await?;

    let outcome = if test {
        let ran = registry.run_batch(&commands).await;
        if ran.is_ok() {
            println!("✓ {} commands executed", commands.len());
        }
        ran.map_err(anyhow::Error::from)
    } else {
        shell::interactive(&mut registry).await
    };
    registry.into_manager().shutdown().await;
    outcome.map(|()| dir)
}
