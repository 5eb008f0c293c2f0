//! Synthetic → placement-block coordinate conversion.
//!
//! The orchestrator only consumes the conversion; node identity and the
//! minimum-separation check are both expressed in block coordinates.

use crate::types::{BlockCoords, SyntheticPoint};

/// Pure conversion from synthetic coordinates to placement blocks.
pub trait CoordinateTransform: Send + Sync {
    fn to_block(&self, point: SyntheticPoint) -> BlockCoords;
}

/// Uniform grid: every `block_size` synthetic units make one block.
#[derive(Debug, Clone, Copy)]
pub struct BlockGrid {
    block_size: f64,
}

impl BlockGrid {
    /// Create a grid. Non-positive sizes fall back to one unit per block.
    pub fn new(block_size: f64) -> Self {
        let block_size = if block_size > 0.0 { block_size } else { 1.0 };
        Self { block_size }
    }

    pub fn block_size(&self) -> f64 {
        self.block_size
    }
}

impl Default for BlockGrid {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl CoordinateTransform for BlockGrid {
    fn to_block(&self, point: SyntheticPoint) -> BlockCoords {
        BlockCoords::new(
            (point.x / self.block_size).floor() as i64,
            (point.y / self.block_size).floor() as i64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_grid_truncates() {
        let grid = BlockGrid::default();
        assert_eq!(grid.to_block(SyntheticPoint::new(3.7, 9.0)), BlockCoords::new(3, 9));
    }

    #[test]
    fn coarse_grid_groups_points() {
        let grid = BlockGrid::new(10.0);
        assert_eq!(grid.to_block(SyntheticPoint::new(0.0, 0.0)), BlockCoords::new(0, 0));
        assert_eq!(grid.to_block(SyntheticPoint::new(19.9, 30.0)), BlockCoords::new(1, 3));
    }

    #[test]
    fn invalid_size_falls_back() {
        assert_eq!(BlockGrid::new(0.0).block_size(), 1.0);
        assert_eq!(BlockGrid::new(-4.0).block_size(), 1.0);
    }
}
