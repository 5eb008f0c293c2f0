//! Placement registry: the set of points occupied by live nodes.

use tracing::debug;

use mesh_core::{BlockCoords, NodeId};

/// A block occupied by a live (or committed) node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementPoint {
    pub node_id: NodeId,
    pub block: BlockCoords,
}

impl PlacementPoint {
    pub fn new(node_id: impl Into<NodeId>, block: BlockCoords) -> Self {
        Self {
            node_id: node_id.into(),
            block,
        }
    }
}

/// Occupied placement points.
///
/// Owned by a single control flow; there is no interior locking.
#[derive(Debug, Default)]
pub struct PlacementRegistry {
    points: Vec<PlacementPoint>,
}

impl PlacementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a point. A previous point for the same node is replaced.
    pub fn add(&mut self, point: PlacementPoint) {
        self.points.retain(|p| p.node_id != point.node_id);
        debug!(node_id = %point.node_id, col = point.block.col, row = point.block.row, "placement committed");
        self.points.push(point);
    }

    /// Forget the point held by `node_id`.
    pub fn remove(&mut self, node_id: &str) -> Option<PlacementPoint> {
        let idx = self.points.iter().position(|p| p.node_id == node_id)?;
        let point = self.points.swap_remove(idx);
        debug!(%node_id, "placement released");
        Some(point)
    }

    /// True iff `block` is at least `min_distance` from every point.
    pub fn is_far_enough(&self, block: BlockCoords, min_distance: f64) -> bool {
        self.points
            .iter()
            .all(|p| p.block.distance(&block) >= min_distance)
    }

    pub fn get(&self, node_id: &str) -> Option<&PlacementPoint> {
        self.points.iter().find(|p| p.node_id == node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.get(node_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlacementPoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
