//! Periodic liveness sweep.
//!
//! Every interval the sweeper probes each registered connection. A failed
//! probe evicts the connection through the broadcaster.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub removed: usize,
}

/// Probes every live connection on a fixed interval.
pub struct LivenessSweeper {
    broadcaster: Broadcaster,
    interval: Duration,
}

impl LivenessSweeper {
    pub fn new(broadcaster: Broadcaster, interval: Duration) -> Self {
        Self {
            broadcaster,
            interval,
        }
    }

    /// Runs a single sweep over the current snapshot.
    pub async fn sweep_once(&self) -> SweepReport {
        let snapshot = match self.broadcaster.registry().snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Liveness sweep skipped");
                return SweepReport::default();
            }
        };

        let results = join_all(
            snapshot
                .iter()
                .map(|(handle, _)| self.broadcaster.probe(handle)),
        )
        .await;

        let report = SweepReport {
            probed: results.len(),
            removed: results.iter().filter(|r| r.is_err()).count(),
        };

        if report.removed > 0 {
            info!(
                probed = report.probed,
                removed = report.removed,
                "Liveness sweep removed dead connections"
            );
        } else {
            debug!(probed = report.probed, "Liveness sweep complete");
        }

        report
    }

    /// Spawns the sweep loop. The first sweep runs one interval after start.
    pub fn spawn(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + self.interval, self.interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = self.interval.as_secs(), "Liveness sweeper started");

            loop {
                tokio::select! {
                    biased;

                    _ = cancel_token.cancelled() => {
                        info!("Liveness sweeper shutting down");
                        break;
                    }

                    _ = tick.tick() => {
                        self.sweep_once().await;
                    }
                }
            }

            debug!("Liveness sweeper task completed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use crate::transport::testing::{failing_handle, recording_handle};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_sweep_once_removes_dead() {
        let broadcaster = Broadcaster::new(spawn_registry(10), 50);
        let (alive, _) = recording_handle();
        let (dead, _) = failing_handle();
        broadcaster.registry().connect(&alive, None).await.unwrap();
        broadcaster.registry().connect(&dead, None).await.unwrap();

        let sweeper = LivenessSweeper::new(broadcaster.clone(), Duration::from_secs(30));
        let report = sweeper.sweep_once().await;

        assert_eq!(report, SweepReport { probed: 2, removed: 1 });
        assert_eq!(broadcaster.registry().count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_probes_on_interval() {
        let broadcaster = Broadcaster::new(spawn_registry(10), 50);
        let (conn, transport) = recording_handle();
        broadcaster.registry().connect(&conn, None).await.unwrap();

        let cancel = CancellationToken::new();
        let task = LivenessSweeper::new(broadcaster, Duration::from_secs(30)).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.pings.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(transport.pings.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
