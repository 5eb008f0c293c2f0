//! Shared types used across meshgrid crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a live node, derived from its role and placement block.
pub type NodeId = String;

/// Prefix of the root node's identifier.
pub const ROOT_PREFIX: &str = "SB_Root_";

/// Prefix of a regular node's identifier.
pub const SERVER_PREFIX: &str = "SBS_";

/// A host:port allocation. One broker and at most one node run per host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,
    pub port: u16,
}

impl Host {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// How node processes are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Child processes on this machine, bound to the loopback address.
    Local,
    /// Sessions opened on remote machines.
    Remote,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Local => "local",
            Transport::Remote => "remote",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a launched process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Broker,
    Root,
    Server,
}

impl Role {
    /// Output substring that signals the process is ready.
    pub fn ready_sentinel(self) -> &'static str {
        match self {
            Role::Broker => crate::protocol::BROKER_READY,
            Role::Root => crate::protocol::ROOT_READY,
            Role::Server => crate::protocol::SERVER_READY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Broker => "broker",
            Role::Root => "root",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coordinate in the synthetic space the operator works in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyntheticPoint {
    pub x: f64,
    pub y: f64,
}

impl SyntheticPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A coordinate in placement-block space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockCoords {
    pub col: i64,
    pub row: i64,
}

impl BlockCoords {
    pub fn new(col: i64, row: i64) -> Self {
        Self { col, row }
    }

    /// Euclidean distance to another block.
    pub fn distance(&self, other: &BlockCoords) -> f64 {
        let dc = (self.col - other.col) as f64;
        let dr = (self.row - other.row) as f64;
        (dc * dc + dr * dr).sqrt()
    }
}

/// Identifier of the root node placed at `block`.
pub fn root_id(block: BlockCoords) -> NodeId {
    format!("{ROOT_PREFIX}{}_{}", block.col, block.row)
}

/// Identifier of a regular node placed at `block`.
pub fn server_id(block: BlockCoords) -> NodeId {
    format!("{SERVER_PREFIX}{}_{}", block.col, block.row)
}

pub fn is_root_id(id: &str) -> bool {
    id.starts_with(ROOT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_role_prefix() {
        let block = BlockCoords::new(12, 40);
        assert_eq!(root_id(block), "SB_Root_12_40");
        assert_eq!(server_id(block), "SBS_12_40");
        assert!(is_root_id(&root_id(block)));
        assert!(!is_root_id(&server_id(block)));
    }

    #[test]
    fn distance_is_euclidean() {
        let a = BlockCoords::new(0, 0);
        let b = BlockCoords::new(3, 4);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(b.distance(&a), 5.0);
    }

    #[test]
    fn host_display() {
        assert_eq!(Host::new("127.0.0.1", 1883).to_string(), "127.0.0.1:1883");
    }
}
