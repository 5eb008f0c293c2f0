//! Fleet error types.

use thiserror::Error;

use mesh_core::{ConfigError, NodeId, Role};
use meshgrid_placement::PlacementError;

use crate::gate::ReadinessError;

/// Errors that can occur while provisioning or driving nodes.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no free port on {ip} up to {ceiling}")]
    ResourceExhausted { ip: String, ceiling: u16 },

    #[error("session to {host} failed: {reason}")]
    Session { host: String, reason: String },

    #[error("cannot launch {role}: {reason}")]
    Launch { role: Role, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("readiness wait failed: {0}")]
    Readiness(#[from] ReadinessError),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("location ({x}, {y}) is closer than {min} blocks to a live node")]
    PlacementConflict { x: f64, y: f64, min: f64 },

    #[error("the root node must be running before regular nodes are added")]
    RootMissing,

    #[error("root node already running: {0}")]
    RootExists(NodeId),

    #[error("node already live: {0}")]
    DuplicateNode(NodeId),

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
}

pub type FleetResult<T> = Result<T, FleetError>;
