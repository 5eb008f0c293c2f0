//! Placement planner: draws coordinates for new nodes.
//!
//! Coordinates are synthetic integers in `[0, range]`. A draw is kept
//! only if its block is far enough from every registered point. Bundle
//! plans commit each point before the next draw, so later nodes of the
//! same bundle see earlier ones even though none of them has started yet.

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use mesh_core::{BlockCoords, CoordinateTransform, NodeId, SyntheticPoint, server_id};

use crate::registry::{PlacementPoint, PlacementRegistry};

#[derive(Debug, Error, PartialEq)]
pub enum PlacementError {
    #[error("no valid location found after {attempts} attempts in range 0 - {range}")]
    Exhausted { attempts: u32, range: u32 },
}

/// A uniformly random integer coordinate in `[0, range]` on both axes.
pub fn random_point(range: u32) -> SyntheticPoint {
    let mut rng = rand::thread_rng();
    SyntheticPoint::new(
        f64::from(rng.gen_range(0..=range)),
        f64::from(rng.gen_range(0..=range)),
    )
}

/// A planned regular node: where it goes and the id it will carry.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedNode {
    pub point: SyntheticPoint,
    pub block: BlockCoords,
    pub node_id: NodeId,
}

/// Chooses valid locations against a registry.
pub struct Planner<'a> {
    transform: &'a dyn CoordinateTransform,
    range: u32,
    min_separation: f64,
    max_attempts: u32,
}

impl<'a> Planner<'a> {
    pub fn new(
        transform: &'a dyn CoordinateTransform,
        range: u32,
        min_separation: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            transform,
            range,
            min_separation,
            max_attempts: max_attempts.max(1),
        }
    }

    /// True iff the transformed point keeps the minimum separation.
    pub fn is_valid(&self, registry: &PlacementRegistry, point: SyntheticPoint) -> bool {
        registry.is_far_enough(self.transform.to_block(point), self.min_separation)
    }

    /// Draw random points until one is valid.
    pub fn choose(&self, registry: &PlacementRegistry) -> Result<SyntheticPoint, PlacementError> {
        for attempt in 1..=self.max_attempts {
            let point = random_point(self.range);
            if self.is_valid(registry, point) {
                debug!(x = point.x, y = point.y, attempt, "location chosen");
                return Ok(point);
            }
        }
        warn!(range = self.range, attempts = self.max_attempts, "placement space exhausted");
        Err(PlacementError::Exhausted {
            attempts: self.max_attempts,
            range: self.range,
        })
    }

    /// Choose and commit `count` regular-node locations.
    ///
    /// On failure nothing from this plan stays committed.
    pub fn plan_bundle(
        &self,
        registry: &mut PlacementRegistry,
        count: usize,
    ) -> Result<Vec<PlannedNode>, PlacementError> {
        let mut planned: Vec<PlannedNode> = Vec::with_capacity(count);
        for _ in 0..count {
            match self.choose(registry) {
                Ok(point) => {
                    let block = self.transform.to_block(point);
                    let node_id = server_id(block);
                    registry.add(PlacementPoint::new(node_id.clone(), block));
                    planned.push(PlannedNode {
                        point,
                        block,
                        node_id,
                    });
                }
                Err(e) => {
                    for node in &planned {
                        registry.remove(&node.node_id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(planned)
    }
}
