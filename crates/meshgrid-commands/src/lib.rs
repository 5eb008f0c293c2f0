//! meshgrid-commands: the operator's command surface.
//!
//! Commands arrive as `{cmd, args}` pairs, either one at a time from the
//! interactive shell or as a batch from a script config. Each is parsed
//! against the catalog into an [`Invocation`] and executed through the
//! [`NodeManager`](meshgrid_fleet::NodeManager).
//!
//! # Components
//!
//! - **`catalog`**: Command names, usage strings, argument parsing
//! - **`registry`**: Validation, batch handling, primitive execution
//! - **`probe`**: How long to wait after a command line is sent
//! - **`bench`**: Traffic and latency benchmarks
//! - **`report`**: Summary figures of a finished run
//! - **`sweep`**: Benchmark grids repeated over fresh meshes

pub mod bench;
pub mod catalog;
pub mod error;
pub mod probe;
pub mod registry;
pub mod report;
pub mod sweep;

pub use bench::distributed_points;
pub use catalog::{CommandSpec, Invocation, Scope, catalog};
pub use error::{CommandError, CommandResult};
pub use probe::{CompletionProbe, FixedSettle};
pub use registry::CommandRegistry;
pub use report::RunReport;
pub use sweep::{Benchmark, SweepCase, SweepPlan, TagFile};
