//! Periodic status notifications.
//!
//! On every tick with at least one live client the scheduler bumps its
//! counter and broadcasts a `[System] Periodic notification` line. Ticks
//! with no clients are skipped and do not advance the counter.
//!
//! # Panic-Free Guarantees
//!
//! Failures are logged and the loop keeps going. The task ends only when
//! its cancellation token fires.

use std::time::Duration;

use beacon_protocol::ServerText;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;

/// Background broadcaster of periodic status lines.
pub struct NotificationScheduler {
    broadcaster: Broadcaster,
    interval: Duration,
    counter: u64,
}

impl NotificationScheduler {
    pub fn new(broadcaster: Broadcaster, interval: Duration) -> Self {
        Self {
            broadcaster,
            interval,
            counter: 0,
        }
    }

    /// Number of notifications sent so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Runs one cycle. Returns the notification number when one was sent.
    pub async fn tick(&mut self) -> Option<u64> {
        let active = match self.broadcaster.registry().count().await {
            Ok(0) => return None,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Periodic notification skipped");
                return None;
            }
        };

        self.counter += 1;
        let text = ServerText::Periodic {
            counter: self.counter,
            active_clients: active,
        }
        .to_string();

        match self.broadcaster.broadcast_all(&text).await {
            Ok(report) => {
                debug!(
                    counter = self.counter,
                    delivered = report.delivered,
                    "Periodic notification sent"
                );
            }
            Err(e) => warn!(error = %e, "Periodic notification failed"),
        }

        Some(self.counter)
    }

    /// Spawns the notification loop.
    pub fn spawn(mut self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + self.interval, self.interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = self.interval.as_secs(), "Notification scheduler started");

            loop {
                tokio::select! {
                    biased;

                    _ = cancel_token.cancelled() => {
                        info!(sent = self.counter, "Notification scheduler shutting down");
                        break;
                    }

                    _ = tick.tick() => {
                        self.tick().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use crate::transport::testing::recording_handle;

    #[tokio::test]
    async fn test_tick_skips_when_empty() {
        let mut scheduler =
            NotificationScheduler::new(Broadcaster::new(spawn_registry(10), 50), Duration::from_secs(10));

        assert_eq!(scheduler.tick().await, None);
        assert_eq!(scheduler.counter(), 0);
    }

    #[tokio::test]
    async fn test_tick_broadcasts_and_counts() {
        let broadcaster = Broadcaster::new(spawn_registry(10), 50);
        let (a, ta) = recording_handle();
        let (b, _) = recording_handle();
        broadcaster.registry().connect(&a, None).await.unwrap();
        broadcaster.registry().connect(&b, None).await.unwrap();

        let mut scheduler = NotificationScheduler::new(broadcaster, Duration::from_secs(10));
        assert_eq!(scheduler.tick().await, Some(1));
        assert_eq!(scheduler.tick().await, Some(2));

        assert_eq!(
            ta.sent(),
            vec![
                "[System] Periodic notification #1 - Active clients: 2",
                "[System] Periodic notification #2 - Active clients: 2",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_loop_exits_cleanly() {
        let broadcaster = Broadcaster::new(spawn_registry(10), 50);
        let (conn, transport) = recording_handle();
        broadcaster.registry().connect(&conn, None).await.unwrap();

        let cancel = CancellationToken::new();
        let task = NotificationScheduler::new(broadcaster, Duration::from_secs(10)).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(transport.sent().len(), 2);

        cancel.cancel();
        assert!(task.await.is_ok());
    }
}
