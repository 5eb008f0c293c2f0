//! meshgrid-fleet: provisioning and lifecycle of mesh nodes.
//!
//! Brings up brokers, the root node and regular nodes, waits for each
//! to report ready on its output, and tears them down again.
//!
//! # Architecture
//!
//! ```text
//! NodeManager
//!   ├── OrchestratorContext (settings, log sink, timestamp counter)
//!   ├── Launcher (local processes | remote sessions | scripted)
//!   │     └── NodeProcess (write-line, terminate, output sources)
//!   ├── ReadinessGate (first sentinel line wins, once)
//!   └── PlacementRegistry (live points, minimum separation)
//! ```
//!
//! Everything runs on one logical control flow. The only spawned tasks
//! are output pumps and gate listeners, which forward lines and never
//! touch orchestrator state.

pub mod context;
pub mod error;
pub mod gate;
pub mod launcher;
pub mod manager;
pub mod observer;
pub mod process;
pub mod scripted;
pub mod sink;

pub use context::{OrchestratorContext, Timestamper};
pub use error::{FleetError, FleetResult};
pub use gate::{ReadinessError, ReadinessGate};
pub use launcher::{LaunchSpec, Launcher, LocalLauncher, RemoteLauncher};
pub use manager::{FleetEntry, HostRequest, NodeManager, NodeState, Topology};
pub use observer::{LineObserver, LineSource, SentinelCount, SentinelMatch};
pub use process::{LocalProcess, NodeProcess, OutputTap, RemoteSession};
pub use scripted::{JournalEntry, ScriptedLauncher};
pub use sink::LogSink;
