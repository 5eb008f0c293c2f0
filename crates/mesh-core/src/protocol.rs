//! Line protocol spoken with node processes.
//!
//! Nodes are opaque: the orchestrator writes one command per line to a
//! node's standard input and scans its output for fixed sentinels.

use std::fmt;

/// Broker finished starting.
pub const BROKER_READY: &str = "running";
/// Root node connected to its broker.
pub const ROOT_READY: &str = "CONNECTED";
/// Regular node joined the mesh.
pub const SERVER_READY: &str = "Successfully added server to mesh.";
/// A node took over a new serving region.
pub const NEW_SERVING_REGION: &str = "NEW SERVING REGION";
/// Prefix of a benchmark result line.
pub const RESULT_PREFIX: &str = "Result:";
/// Suffix of a line reporting an echoed ping.
pub const ECHO_PING: &str = "ECHO PING";
/// A message was forwarded one hop.
pub const NEXT_HOP: &str = "Sending msg to next hop";

/// Repetition parameters of a timed ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRepeat {
    pub count: u64,
    /// Milliseconds between pings.
    pub timeout_ms: u64,
}

/// One line written to a node's input channel.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCommand {
    RemoveServer,
    Query {
        target: String,
    },
    ServingRegion {
        target: String,
    },
    PingBlock {
        x: f64,
        y: f64,
        message: String,
        repeat: Option<PingRepeat>,
    },
    PingRegion {
        x_start: f64,
        x_end: f64,
        y_start: f64,
        y_end: f64,
        message: String,
        repeat: Option<PingRepeat>,
    },
}

impl NodeCommand {
    /// Keyword that starts the line.
    pub fn keyword(&self) -> &'static str {
        match self {
            NodeCommand::RemoveServer => "remove_server",
            NodeCommand::Query { .. } => "query",
            NodeCommand::ServingRegion { .. } => "serving_region",
            NodeCommand::PingBlock { .. } => "ping_block",
            NodeCommand::PingRegion { .. } => "ping_region",
        }
    }

    /// Extra time the node needs to carry out a timed ping, in milliseconds.
    pub fn repeat_budget_ms(&self) -> u64 {
        match self {
            NodeCommand::PingBlock {
                repeat: Some(r), ..
            }
            | NodeCommand::PingRegion {
                repeat: Some(r), ..
            } => r.timeout_ms.saturating_mul(r.count),
            _ => 0,
        }
    }
}

impl fmt::Display for NodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())?;
        match self {
            NodeCommand::RemoveServer => Ok(()),
            NodeCommand::Query { target } | NodeCommand::ServingRegion { target } => {
                write!(f, " {target}")
            }
            NodeCommand::PingBlock {
                x,
                y,
                message,
                repeat,
            } => {
                write!(f, " {x} {y} {message}")?;
                write_repeat(f, repeat)
            }
            NodeCommand::PingRegion {
                x_start,
                x_end,
                y_start,
                y_end,
                message,
                repeat,
            } => {
                write!(f, " {x_start} {x_end} {y_start} {y_end} {message}")?;
                write_repeat(f, repeat)
            }
        }
    }
}

fn write_repeat(f: &mut fmt::Formatter<'_>, repeat: &Option<PingRepeat>) -> fmt::Result {
    match repeat {
        Some(r) => write!(f, " {} {}", r.count, r.timeout_ms),
        None => Ok(()),
    }
}

/// Parse the value of a `Result:<number>` line.
pub fn parse_result_line(line: &str) -> Option<f64> {
    line.trim()
        .strip_prefix(RESULT_PREFIX)
        .and_then(|v| v.trim().parse().ok())
}
