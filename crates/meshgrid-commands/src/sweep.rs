//! Throughput sweeps: one benchmark repeated over a grid of fleet sizes
//! and ping intervals, each repetition on a freshly built mesh.
//!
//! A sweep produces one scripted config per case and one CSV row per
//! repetition. The row is computed from the [`RunReport`] of that
//! repetition's run directory and carries the run tag.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::json;

use mesh_core::{Command, ScriptConfig};

use crate::report::RunReport;

/// The benchmark a sweep repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Benchmark {
    /// Echoed pings from one random node (`performance_1`).
    SingleSource,
    /// Echoed pings from every node at once (`performance_2`).
    AllSources,
    /// Forwarding hops per query of an `exhaustiveQuery`.
    QueryHops,
    /// Forwarding hops per query of an `exhaustiveRegion`.
    RegionHops,
    /// Add latency (`performance_5`).
    AddLatency,
    /// Removal latency (`performance_6`).
    RemoveLatency,
}

impl Benchmark {
    pub const ALL: [Benchmark; 6] = [
        Benchmark::SingleSource,
        Benchmark::AllSources,
        Benchmark::QueryHops,
        Benchmark::RegionHops,
        Benchmark::AddLatency,
        Benchmark::RemoveLatency,
    ];

    /// Name used for result and config files.
    pub fn name(self) -> &'static str {
        match self {
            Benchmark::SingleSource => "performance_1",
            Benchmark::AllSources => "performance_2",
            Benchmark::QueryHops => "performance_3",
            Benchmark::RegionHops => "performance_4",
            Benchmark::AddLatency => "performance_5",
            Benchmark::RemoveLatency => "performance_6",
        }
    }

    /// Only traffic benchmarks vary the ping interval.
    pub fn uses_interval(self) -> bool {
        matches!(self, Benchmark::SingleSource | Benchmark::AllSources)
    }

    pub fn csv_header(self) -> &'static str {
        match self {
            Benchmark::SingleSource => "PingInterval,TotalNumServers,ExecutionTime,NumEchoPings,tag",
            Benchmark::AllSources => {
                "PingInterval,TotalNumServers,ExecutionTime,NumServersPinging,NumEchoPings,tag"
            }
            Benchmark::QueryHops | Benchmark::RegionHops => "number of servers,HopsOnAverage,tag",
            Benchmark::AddLatency => "number of servers,TimeToAdd,tag",
            Benchmark::RemoveLatency => "number of servers,TimeRemove,tag",
        }
    }

    /// The single command a repetition runs.
    pub fn command(self, case: &SweepCase, duration_ms: u64) -> Command {
        let interval = case.interval_ms.unwrap_or_default();
        let args = match self {
            Benchmark::SingleSource => vec![json!(interval), json!(duration_ms)],
            Benchmark::AllSources => vec![json!(interval), json!(duration_ms), json!(case.servers)],
            _ => Vec::new(),
        };
        let name = match self {
            Benchmark::QueryHops => "exhaustiveQuery",
            Benchmark::RegionHops => "exhaustiveRegion",
            other => other.name(),
        };
        Command::new(name, args)
    }

    /// One CSV row for a finished repetition.
    pub fn row(self, case: &SweepCase, duration_ms: u64, report: &RunReport, tag: &str) -> String {
        let servers = case.servers;
        let interval = case.interval_ms.unwrap_or_default();
        let result = report.result.map(|v| v.to_string()).unwrap_or_default();
        match self {
            Benchmark::SingleSource => format!(
                "{interval},{servers},{duration_ms},{},{tag}",
                report.echoed_pings
            ),
            Benchmark::AllSources => format!(
                "{interval},{servers},{duration_ms},{servers},{},{tag}",
                report.echoed_pings
            ),
            Benchmark::QueryHops | Benchmark::RegionHops => {
                format!("{servers},{},{tag}", hops_per_query(report.next_hops, servers))
            }
            Benchmark::AddLatency | Benchmark::RemoveLatency => format!("{servers},{result},{tag}"),
        }
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Benchmark {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Benchmark::ALL
            .into_iter()
            .find(|b| b.name() == s)
            .ok_or_else(|| format!("unknown benchmark {s:?} (expected performance_1 .. performance_6)"))
    }
}

/// Average hops per query over the `n²` ordered pairs an exhaustive
/// command visits on a fleet of `n` nodes.
pub fn hops_per_query(hops: usize, nodes: u32) -> f64 {
    if nodes == 0 {
        return 0.0;
    }
    let pairs = f64::from(nodes) * f64::from(nodes);
    hops as f64 / pairs
}

/// One point of the sweep grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepCase {
    pub interval_ms: Option<u64>,
    /// Fleet size, root included.
    pub servers: u32,
}

/// Grid and repetition count of a sweep.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub benchmark: Benchmark,
    pub intervals_ms: Vec<u64>,
    pub server_counts: Vec<u32>,
    pub repeats: u32,
    pub duration_ms: u64,
    pub range: u32,
    pub local_host: bool,
}

impl SweepPlan {
    pub fn new(benchmark: Benchmark) -> Self {
        Self {
            benchmark,
            intervals_ms: vec![10, 100, 1000],
            server_counts: vec![15, 30, 45, 60],
            repeats: 5,
            duration_ms: 10_000,
            range: 10_000,
            local_host: true,
        }
    }

    /// Interval-major order for traffic benchmarks, fleet sizes otherwise.
    pub fn cases(&self) -> Vec<SweepCase> {
        if self.benchmark.uses_interval() {
            self.intervals_ms
                .iter()
                .flat_map(|&interval| {
                    self.server_counts.iter().map(move |&servers| SweepCase {
                        interval_ms: Some(interval),
                        servers,
                    })
                })
                .collect()
        } else {
            self.server_counts
                .iter()
                .map(|&servers| SweepCase {
                    interval_ms: None,
                    servers,
                })
                .collect()
        }
    }

    /// Scripted config for every repetition of `case`.
    pub fn config(&self, case: &SweepCase) -> ScriptConfig {
        ScriptConfig {
            range: self.range,
            test: true,
            local_host: self.local_host,
            random: Some(case.servers),
            servers_info: Vec::new(),
            root_coords: None,
            root_host: None,
            commands: vec![self.benchmark.command(case, self.duration_ms)],
        }
    }

    pub fn row(&self, case: &SweepCase, report: &RunReport, tag: &str) -> String {
        self.benchmark.row(case, self.duration_ms, report, tag)
    }
}

/// Contents of `tag.json`: the tag of the most recent run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagFile {
    pub tag: String,
}
