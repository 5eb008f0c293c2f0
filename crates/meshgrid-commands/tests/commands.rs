//! Command execution over a simulated fleet.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};

use mesh_core::{Command, NodeCommand, Role, ScriptConfig, Settings, Transport};
use meshgrid_commands::{CommandError, CommandRegistry, CompletionProbe, RunReport};
use meshgrid_fleet::{FleetError, LogSink, NodeManager, OrchestratorContext, ScriptedLauncher, Topology};

const LAYOUT: &str = r#"{"range": 100, "localHost": true, "rootCoords": [50, 50],
    "serversInfo": [
        {"ip": "127.0.0.1", "port": 1884, "coords": [0, 0]},
        {"ip": "127.0.0.1", "port": 1885, "coords": [90, 90]},
        {"ip": "127.0.0.1", "port": 1886, "coords": [10, 90]}
    ]}"#;

struct Harness {
    _dir: tempfile::TempDir,
    sink: LogSink,
    launcher: ScriptedLauncher,
    registry: CommandRegistry,
}

impl Harness {
    async fn new() -> Self {
        let mut settings = Settings::default();
        settings.timing.settle_ms = 1;
        settings.timing.removal_grace_ms = 1;
        settings.timing.log_poll_ms = 1;

        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path()).await.unwrap();
        let ctx = OrchestratorContext::new(settings, sink.clone());
        let launcher = ScriptedLauncher::new(Transport::Local, sink.clone());
        let mut manager = NodeManager::new(ctx, Arc::new(launcher.clone()), 100);
        let config = ScriptConfig::from_json(LAYOUT).unwrap();
        manager.initialize(Topology::FromConfig(config)).await.unwrap();
        Harness {
            _dir: dir,
            sink,
            launcher,
            registry: CommandRegistry::new(manager),
        }
    }

    fn stamps(&self) -> u64 {
        self.registry.manager().context().clock.current()
    }

    async fn root_log(&self) -> String {
        self.sink.read(Role::Root).await.unwrap()
    }
}

fn cmd(name: &str, args: Value) -> Command {
    Command::new(name, args.as_array().cloned().unwrap_or_default())
}

#[tokio::test]
async fn exhaustive_query_covers_every_ordered_pair() {
    let mut h = Harness::new().await;
    h.registry.run(&cmd("exhaustiveQuery", json!([]))).await.unwrap();

    let sent = h.launcher.sent("query");
    assert_eq!(sent.len(), 16);
    assert_eq!(h.stamps(), 16);
    // Self pairs are included.
    assert!(sent.iter().any(|e| e.line == "query SB_Root_50_50" && e.role == Role::Root));

    let log = h.root_log().await;
    assert!(log.contains("Command : query SBS_0_0 --- executed from SB_Root_50_50 server"));
    assert_eq!(log.matches("COMMAND EXECUTION IS OVER").count(), 16);
}

#[tokio::test]
async fn group_region_asks_one_source_about_everyone() {
    let mut h = Harness::new().await;
    h.registry
        .run(&cmd("groupRegion", json!(["SBS_90_90"])))
        .await
        .unwrap();
    let sent = h.launcher.sent("serving_region");
    assert_eq!(sent.len(), 4);
    assert!(sent.iter().all(|e| e.host.port == 1885));
}

#[tokio::test]
async fn invalid_batch_runs_nothing() {
    let mut h = Harness::new().await;
    let batch = vec![cmd("exhaustiveQuery", json!([])), cmd("bogus", json!([1]))];
    let err = h.registry.run_batch(&batch).await.unwrap_err();
    assert!(matches!(err, CommandError::InvalidCommand(ref name) if name == "bogus"));
    assert!(h.launcher.sent("query").is_empty());
    assert_eq!(h.stamps(), 0);
}

#[tokio::test]
async fn batch_ids_are_checked_before_anything_runs() {
    let mut h = Harness::new().await;
    let batch = vec![
        cmd("singularQuery", json!(["SBS_0_0", "SB_Root_50_50"])),
        cmd("singularQuery", json!(["SBS_0_0", "SBS_42_42"])),
    ];
    let err = h.registry.run_batch(&batch).await.unwrap_err();
    assert!(matches!(err, CommandError::UnavailableServer(ref id) if id == "SBS_42_42"));
    assert!(h.launcher.sent("query").is_empty());
    assert_eq!(h.stamps(), 0);
}

#[tokio::test]
async fn batch_validation_follows_adds_and_removes() {
    let h = Harness::new().await;
    let shaped = vec![
        cmd("addServerInteractive", json!([30, 30])),
        cmd("singularQuery", json!(["SBS_30_30", "SBS_0_0"])),
        cmd("removeServer", json!(["SBS_0_0"])),
    ];
    assert_eq!(h.registry.validate_commands(&shaped).unwrap().len(), 3);

    let mut stale = shaped.clone();
    stale.push(cmd("groupQuery", json!(["SBS_0_0"])));
    let err = h.registry.validate_commands(&stale).unwrap_err();
    assert!(matches!(err, CommandError::UnavailableServer(ref id) if id == "SBS_0_0"));
}

#[tokio::test]
async fn bundles_admit_regular_ids_only() {
    let h = Harness::new().await;
    let regular = vec![
        cmd("addServerBundle", json!([1])),
        cmd("groupRegion", json!(["SBS_77_77"])),
    ];
    assert!(h.registry.validate_commands(&regular).is_ok());

    let root = vec![
        cmd("addServerBundle", json!([1])),
        cmd("groupRegion", json!(["SB_Root_1_1"])),
    ];
    assert!(matches!(
        h.registry.validate_commands(&root),
        Err(CommandError::UnavailableServer(_))
    ));
}

#[derive(Clone, Default)]
struct RecordingProbe(Arc<Mutex<Vec<(String, String)>>>);

#[async_trait]
impl CompletionProbe for RecordingProbe {
    async fn wait(&self, node: &str, command: &NodeCommand, _base: Duration) {
        self.0
            .lock()
            .unwrap()
            .push((node.to_string(), command.to_string()));
    }
}

#[tokio::test]
async fn completion_probe_is_awaited_once_per_primitive() {
    let mut h = Harness::new().await;
    let probe = RecordingProbe::default();
    h.registry = h.registry.with_completion_probe(Box::new(probe.clone()));

    h.registry
        .run(&cmd("groupQuery", json!(["SBS_90_90"])))
        .await
        .unwrap();
    h.registry
        .run(&cmd("pingBlock", json!([5, 5, "SB_Root_50_50", "hi"])))
        .await
        .unwrap();

    let waits = probe.0.lock().unwrap().clone();
    assert_eq!(waits.len(), 5);
    assert!(waits[..4].iter().all(|(node, _)| node == "SBS_90_90"));
    assert_eq!(waits[4].0, "SB_Root_50_50");

    let written: Vec<String> = h.launcher.journal().into_iter().map(|e| e.line).collect();
    let awaited: Vec<String> = waits.into_iter().map(|(_, line)| line).collect();
    assert_eq!(written, awaited);
    assert_eq!(h.stamps(), 5);
}

#[tokio::test]
async fn argument_errors_are_reported_before_execution() {
    let mut h = Harness::new().await;
    let mismatch = h.registry.run(&cmd("pingBlock", json!([1, 2, "SBS_0_0"]))).await;
    assert!(matches!(mismatch, Err(CommandError::ArgumentMismatch { .. })));

    let out_of_range = h
        .registry
        .run(&cmd("pingBlock", json!([1, 200, "SBS_0_0", "m"])))
        .await;
    assert!(matches!(out_of_range, Err(CommandError::ArgumentValue { .. })));
    assert_eq!(h.stamps(), 0);
}

#[tokio::test]
async fn removing_an_absent_node_is_a_no_op() {
    let mut h = Harness::new().await;
    let before = h.registry.manager().ids();
    let placements = h.registry.manager().placements().len();
    h.registry
        .run(&cmd("removeServer", json!(["SBS_42_42"])))
        .await
        .unwrap();
    assert_eq!(h.registry.manager().ids(), before);
    assert_eq!(h.registry.manager().placements().len(), placements);
    assert!(h.launcher.sent("remove_server").is_empty());
    assert_eq!(h.stamps(), 0);
}

#[tokio::test]
async fn queries_name_the_missing_node() {
    let mut h = Harness::new().await;
    let err = h
        .registry
        .run(&cmd("singularQuery", json!(["SBS_0_0", "SBS_42_42"])))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::UnavailableServer(ref id) if id == "SBS_42_42"));
    assert_eq!(h.stamps(), 0);
}

#[tokio::test]
async fn remove_server_writes_its_banner() {
    let mut h = Harness::new().await;
    h.registry
        .run(&cmd("removeServer", json!(["SBS_0_0"])))
        .await
        .unwrap();
    assert!(!h.registry.manager().contains("SBS_0_0"));
    assert!(h.root_log().await.contains("Command : remove_server SBS_0_0"));
    assert_eq!(h.launcher.terminated(), vec!["server@127.0.0.1:1884"]);
}

#[tokio::test]
async fn timed_ping_waits_for_its_repeats() {
    let mut h = Harness::new().await;
    let started = Instant::now();
    h.registry
        .run(&cmd("pingBlock", json!([50, 50, "SBS_0_0", "hi", 3, 20])))
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));

    let sent = h.launcher.sent("ping_block");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].line, "ping_block 50 50 hi 3 20");
}

#[tokio::test]
async fn add_server_interactive_places_a_new_node() {
    let mut h = Harness::new().await;
    h.registry
        .run(&cmd("addServerInteractive", json!([30, 30])))
        .await
        .unwrap();
    let entry = h.registry.manager().entry("SBS_30_30").unwrap();
    assert_eq!(entry.host.port, 1887);
    assert!(
        h.root_log()
            .await
            .contains("Add server --- adding a server on 30, 30 block on port 1887")
    );

    let hosts = h.registry.manager().hosts().len();
    let crowded = h
        .registry
        .run(&cmd("addServerInteractive", json!([31, 30])))
        .await
        .unwrap_err();
    assert!(matches!(
        crowded,
        CommandError::Fleet(FleetError::PlacementConflict { .. })
    ));
    assert_eq!(h.registry.manager().hosts().len(), hosts);
}

#[tokio::test]
async fn add_server_bundle_grows_the_fleet() {
    let mut h = Harness::new().await;
    h.registry
        .run(&cmd("addServerBundle", json!([2])))
        .await
        .unwrap();
    assert_eq!(h.registry.manager().len(), 6);
    assert!(
        h.root_log()
            .await
            .contains("Add server bundle --- number of servers to add: 2")
    );
}

#[tokio::test]
async fn performance_1_sends_traffic_until_the_deadline() {
    let mut h = Harness::new().await;
    h.registry
        .run(&cmd("performance_1", json!([5, 30])))
        .await
        .unwrap();
    let pings = h.launcher.sent("ping_block");
    assert!(!pings.is_empty());
    let source = &pings[0].host;
    assert!(pings.iter().all(|p| p.host == *source));
    assert!(h.root_log().await.contains("DONE : 2 --- Command : performance_1 --- "));
}

#[tokio::test]
async fn performance_2_rejects_more_nodes_than_exist() {
    let mut h = Harness::new().await;
    let err = h
        .registry
        .run(&cmd("performance_2", json!([5, 30, 5])))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::ArgumentValue { .. }));

    h.registry
        .run(&cmd("performance_2", json!([5, 20, 2])))
        .await
        .unwrap();
    let mut sources: Vec<u16> = h
        .launcher
        .sent("ping_block")
        .iter()
        .map(|e| e.host.port)
        .collect();
    sources.sort();
    sources.dedup();
    assert_eq!(sources.len(), 2);
}

#[tokio::test]
async fn performance_5_measures_and_restores_the_fleet() {
    let mut h = Harness::new().await;
    let before = h.registry.manager().ids();
    h.registry
        .run(&cmd("performance_5", json!([])))
        .await
        .unwrap();

    assert_eq!(h.registry.manager().ids(), before);
    // (0, 0) is occupied, the other eight grid points are measured.
    assert_eq!(h.launcher.sent("remove_server").len(), 8);
    let log = h.root_log().await;
    assert!(log.contains("Result:"));
    assert!(log.contains("Command : performance_5"));
}

#[tokio::test]
async fn performance_6_waits_for_every_handover() {
    let mut h = Harness::new().await;
    h.registry
        .run(&cmd("performance_6", json!([])))
        .await
        .unwrap();

    assert_eq!(h.registry.manager().regular_ids().len(), 2);
    assert_eq!(h.launcher.terminated().len(), 1);
    let report = RunReport::scan(h.sink.dir()).await.unwrap();
    assert!(report.result.is_some());
    let servers = h.sink.read(Role::Server).await.unwrap();
    assert_eq!(servers.matches("NEW SERVING REGION").count(), 2);
}

#[tokio::test]
async fn report_counts_pings_of_a_run() {
    let mut h = Harness::new().await;
    h.registry
        .run(&cmd("pingBlock", json!([10, 10, "SBS_90_90", "hello"])))
        .await
        .unwrap();
    h.registry
        .run(&cmd("pingRegion", json!([0, 20, 0, 20, "SB_Root_50_50", "again"])))
        .await
        .unwrap();

    let report = RunReport::scan(h.sink.dir()).await.unwrap();
    assert_eq!(report.echoed_pings, 2);
    assert_eq!(report.next_hops, 2);
    assert_eq!(report.result, None);
}
