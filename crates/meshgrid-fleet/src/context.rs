//! Per-run orchestrator context.
//!
//! Constructed once per run and handed to every component, so nothing
//! relies on process-wide state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mesh_core::{BlockGrid, CoordinateTransform, Settings};

use crate::sink::LogSink;

/// Monotonic counter stamped on every command banner.
#[derive(Debug, Default)]
pub struct Timestamper {
    counter: AtomicU64,
}

impl Timestamper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the new stamp. The first stamp is 1.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last stamp handed out (0 before the first).
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

/// Settings, log sink, timestamp counter and coordinate transform.
pub struct OrchestratorContext {
    pub settings: Settings,
    pub sink: LogSink,
    pub clock: Timestamper,
    transform: Box<dyn CoordinateTransform>,
}

impl OrchestratorContext {
    /// Build a context using a uniform block grid from the settings.
    pub fn new(settings: Settings, sink: LogSink) -> Arc<Self> {
        let grid = BlockGrid::new(settings.placement.block_size);
        Self::with_transform(settings, sink, Box::new(grid))
    }

    pub fn with_transform(
        settings: Settings,
        sink: LogSink,
        transform: Box<dyn CoordinateTransform>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            sink,
            clock: Timestamper::new(),
            transform,
        })
    }

    pub fn transform(&self) -> &dyn CoordinateTransform {
        self.transform.as_ref()
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settings.timing.settle_ms)
    }

    pub fn removal_grace(&self) -> Duration {
        Duration::from_millis(self.settings.timing.removal_grace_ms)
    }

    pub fn log_poll(&self) -> Duration {
        Duration::from_millis(self.settings.timing.log_poll_ms.max(1))
    }

    /// Write an opening banner with the next timestamp.
    pub async fn stamp(&self, description: &str) -> std::io::Result<u64> {
        let stamp = self.clock.next();
        self.sink
            .write_all(&format!("####\nTimeStamp : {stamp} --- Command : {description}\n####\n"))
            .await?;
        Ok(stamp)
    }

    /// Write the closing banner of a primitive command.
    pub async fn over(&self) -> std::io::Result<()> {
        self.sink
            .write_all("####\nCOMMAND EXECUTION IS OVER\n####\n\n")
            .await
    }

    /// Write the closing banner of a benchmark with the next timestamp.
    pub async fn done(&self, description: &str) -> std::io::Result<u64> {
        let stamp = self.clock.next();
        self.sink
            .write_all(&format!("####\nDONE : {stamp} --- Command : {description}\n####\n"))
            .await?;
        Ok(stamp)
    }

    /// Write a benchmark result line.
    pub async fn result(&self, value: f64) -> std::io::Result<()> {
        self.sink
            .write_all(&format!("{}{value}\n", mesh_core::protocol::RESULT_PREFIX))
            .await
    }
}
