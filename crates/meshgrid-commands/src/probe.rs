//! Completion probes: how long to wait after writing a command line.
//!
//! Nodes do not acknowledge commands. The default probe sleeps for the
//! settle delay, extended by the repeat budget of a timed ping.

use std::time::Duration;

use async_trait::async_trait;

use mesh_core::NodeCommand;

#[async_trait]
pub trait CompletionProbe: Send + Sync {
    /// Returns once `command`, just written to `node`, is considered done.
    async fn wait(&self, node: &str, command: &NodeCommand, base: Duration);
}

/// Sleeps `base` plus the command's repeat budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSettle;

impl FixedSettle {
    pub fn delay(command: &NodeCommand, base: Duration) -> Duration {
        base + Duration::from_millis(command.repeat_budget_ms())
    }
}

#[async_trait]
impl CompletionProbe for FixedSettle {
    async fn wait(&self, _node: &str, command: &NodeCommand, base: Duration) {
        tokio::time::sleep(Self::delay(command, base)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::protocol::PingRepeat;

    #[test]
    fn timed_pings_extend_the_delay() {
        let base = Duration::from_millis(500);
        assert_eq!(FixedSettle::delay(&NodeCommand::RemoveServer, base), base);

        let ping = NodeCommand::PingBlock {
            x: 1.0,
            y: 1.0,
            message: "m".into(),
            repeat: Some(PingRepeat {
                count: 4,
                timeout_ms: 250,
            }),
        };
        assert_eq!(FixedSettle::delay(&ping, base), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn waits_the_whole_delay() {
        let start = tokio::time::Instant::now();
        FixedSettle
            .wait("SBS_1_1", &NodeCommand::RemoveServer, Duration::from_millis(30))
            .await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
