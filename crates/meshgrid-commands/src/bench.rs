//! Benchmarks run against the live fleet.
//!
//! - `performance_1` and `performance_2` drive random `ping_block` traffic
//!   from one or several nodes for a fixed duration.
//! - `performance_5` measures how long adding a node takes.
//! - `performance_6` measures how long the mesh takes to hand over the
//!   serving region of a removed node.
//!
//! Latency benchmarks append a `Result:<ms>` line to every log file.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use tracing::{info, warn};

use mesh_core::protocol::NEW_SERVING_REGION;
use mesh_core::{NodeCommand, NodeId, Role, SyntheticPoint};
use meshgrid_fleet::{HostRequest, SentinelCount};
use meshgrid_placement::random_point;

use crate::error::{CommandError, CommandResult};
use crate::registry::CommandRegistry;

const PERFORMANCE_6: &str = "performance_6";

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

fn random_ping(range: u32) -> NodeCommand {
    let point = random_point(range);
    NodeCommand::PingBlock {
        x: point.x,
        y: point.y,
        message: epoch_millis().to_string(),
        repeat: None,
    }
}

fn pick(ids: &[NodeId], n: usize) -> Vec<NodeId> {
    ids.choose_multiple(&mut rand::thread_rng(), n)
        .cloned()
        .collect()
}

/// Points `(i·⌊range/3⌋, j·⌊range/3⌋)` for `i, j` in `0..3`.
pub fn distributed_points(range: u32) -> Vec<SyntheticPoint> {
    let segment = f64::from(range / 3);
    (0..3)
        .flat_map(|i: u32| {
            (0..3u32).map(move |j| {
                SyntheticPoint::new(f64::from(i) * segment, f64::from(j) * segment)
            })
        })
        .collect()
}

fn average_ms(samples: &[Duration]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: f64 = samples.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
    Some(total / samples.len() as f64)
}

impl CommandRegistry {
    fn empty_fleet(command: &str) -> CommandError {
        CommandError::ArgumentValue {
            command: command.to_string(),
            message: "the mesh has no nodes".into(),
        }
    }

    /// Random pings from one random node every `interval_ms`.
    pub(crate) async fn performance_1(&mut self, interval_ms: u64, duration_ms: u64) -> CommandResult<()> {
        let Some(id) = pick(&self.manager.ids(), 1).pop() else {
            return Err(Self::empty_fleet("performance_1"));
        };
        self.traffic("performance_1", vec![id], interval_ms, duration_ms)
            .await
    }

    /// Random pings from `servers` distinct random nodes every `interval_ms`.
    pub(crate) async fn performance_2(
        &mut self,
        interval_ms: u64,
        duration_ms: u64,
        servers: usize,
    ) -> CommandResult<()> {
        let ids = self.manager.ids();
        if servers > ids.len() {
            return Err(CommandError::ArgumentValue {
                command: "performance_2".into(),
                message: format!("{servers} servers requested but the mesh has {}", ids.len()),
            });
        }
        self.traffic("performance_2", pick(&ids, servers), interval_ms, duration_ms)
            .await
    }

    async fn traffic(
        &mut self,
        name: &str,
        ids: Vec<NodeId>,
        interval_ms: u64,
        duration_ms: u64,
    ) -> CommandResult<()> {
        let description = format!("{name} --- {}", ids.join(","));
        self.ctx.stamp(&description).await?;
        info!(benchmark = name, nodes = ids.len(), interval_ms, duration_ms, "traffic started");

        let range = self.manager.range();
        let interval = Duration::from_millis(interval_ms);
        let duration = Duration::from_millis(duration_ms);
        let started = Instant::now();
        let mut rounds = 0u64;
        while started.elapsed() <= duration {
            for id in &ids {
                self.manager.send(id, &random_ping(range)).await?;
            }
            rounds += 1;
            tokio::time::sleep(interval).await;
        }

        info!(benchmark = name, rounds, "traffic finished");
        self.ctx.done(&description).await?;
        Ok(())
    }

    /// Add latency over a 3×3 grid on one fresh host. Each node is removed
    /// again once measured; grid points too close to a live node are skipped.
    pub(crate) async fn performance_5(&mut self) -> CommandResult<()> {
        self.ctx.stamp("performance_5").await?;
        let host = self.manager.allocate_host(HostRequest::Next).await?;
        self.manager.start_broker(&host).await?;

        let mut samples = Vec::new();
        for point in distributed_points(self.manager.range()) {
            if !self.manager.is_valid_location(point) {
                info!(x = point.x, y = point.y, "grid point occupied, skipped");
                continue;
            }
            let started = Instant::now();
            let id = self.manager.add_server(&host, point).await?;
            samples.push(started.elapsed());
            self.manager.remove_server(&id).await?;
        }

        match average_ms(&samples) {
            Some(avg) => {
                info!(samples = samples.len(), avg_ms = avg, "add latency measured");
                self.ctx.result(avg).await?;
            }
            None => warn!("no grid point was free, no add latency measured"),
        }
        self.ctx.done("performance_5").await?;
        Ok(())
    }

    /// Removal latency of one random regular node, measured until every
    /// remaining regular node has announced a new serving region.
    pub(crate) async fn performance_6(&mut self) -> CommandResult<()> {
        let regular = self.manager.regular_ids();
        let Some(id) = pick(&regular, 1).pop() else {
            return Err(CommandError::ArgumentValue {
                command: PERFORMANCE_6.into(),
                message: "the mesh has no regular nodes".into(),
            });
        };
        let expected = regular.len() - 1;

        let sink = self.ctx.sink.clone();
        let offset = sink.len(Role::Server).await?;
        self.ctx
            .stamp(&format!("{PERFORMANCE_6} --- server removed: {id}"))
            .await?;

        let started = Instant::now();
        self.manager.send(&id, &NodeCommand::RemoveServer).await?;
        let mut handovers = SentinelCount::new(NEW_SERVING_REGION, expected)
            .after(PERFORMANCE_6)
            .skip_echo();
        sink.wait_for(Role::Server, offset, &mut handovers, self.ctx.log_poll())
            .await?;
        let elapsed = started.elapsed();

        self.manager.terminate_and_purge(&id).await?;
        let ms = elapsed.as_secs_f64() * 1000.0;
        info!(node_id = %id, handovers = handovers.seen(), elapsed_ms = ms, "removal latency measured");
        self.ctx.result(ms).await?;
        self.ctx.done(PERFORMANCE_6).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_covers_three_by_three() {
        let points = distributed_points(100);
        assert_eq!(points.len(), 9);
        assert_eq!(points[0], SyntheticPoint::new(0.0, 0.0));
        assert_eq!(points[4], SyntheticPoint::new(33.0, 33.0));
        assert_eq!(points[8], SyntheticPoint::new(66.0, 66.0));
    }

    #[test]
    fn average_of_nothing_is_none() {
        assert_eq!(average_ms(&[]), None);
        let avg = average_ms(&[Duration::from_millis(10), Duration::from_millis(30)]).unwrap();
        assert!((avg - 20.0).abs() < 1e-9);
    }

    #[test]
    fn pick_returns_distinct_ids() {
        let ids: Vec<NodeId> = (0..5).map(|i| format!("SBS_{i}_{i}")).collect();
        let mut chosen = pick(&ids, 3);
        chosen.sort();
        chosen.dedup();
        assert_eq!(chosen.len(), 3);
        assert!(pick(&[], 1).is_empty());
    }
}
