//! mesh-core: shared vocabulary for the meshgrid testbed orchestrator.
//!
//! Everything here is pure: no processes, no I/O beyond reading config
//! files. The orchestrating crates build on these types.

pub mod config;
pub mod coords;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{Command, ScriptConfig, ServerInfo, Settings, render_command};
pub use coords::{BlockGrid, CoordinateTransform};
pub use error::{ConfigError, ConfigResult};
pub use protocol::NodeCommand;
pub use types::*;
