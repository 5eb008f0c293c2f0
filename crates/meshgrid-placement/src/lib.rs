//! meshgrid placement: where nodes may live.
//!
//! Placement decisions are made in block coordinates. The registry
//! holds the points of live nodes; the planner draws random synthetic
//! coordinates that keep every pair of live nodes at least the minimum
//! separation apart.
//!
//! # Components
//!
//! - **`registry`**: Live placement points and the separation check
//! - **`planner`**: Random coordinate choice and up-front commitment

pub mod planner;
pub mod registry;

pub use planner::{PlacementError, PlannedNode, Planner, random_point};
pub use registry::{PlacementPoint, PlacementRegistry};
