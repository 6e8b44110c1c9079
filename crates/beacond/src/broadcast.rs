//! Outbound fan-out over the registry.
//!
//! Every operation works on an owned snapshot taken from the registry at
//! call start. Sends run concurrently and outside the actor; handles whose
//! send fails are collected and evicted after the pass, so one dead peer
//! never blocks or aborts delivery to the others.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the workspace panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-connection send failures are recovered by eviction, never raised

use std::collections::HashSet;

use beacon_protocol::preview;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::registry::{RegistryError, RegistryHandle, RemovalReason};
use crate::transport::{ConnectionHandle, ConnectionKey, SendError};

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that received the message
    pub delivered: usize,

    /// Connections evicted because their send failed
    pub evicted: usize,
}

/// Sends messages to registered connections and evicts the ones that fail.
#[derive(Clone)]
pub struct Broadcaster {
    registry: RegistryHandle,
    preview_len: usize,
}

impl Broadcaster {
    /// Creates a broadcaster over `registry`.
    ///
    /// `preview_len` bounds how much of each message shows up in logs.
    pub fn new(registry: RegistryHandle, preview_len: usize) -> Self {
        Self {
            registry,
            preview_len,
        }
    }

    /// Returns the registry this broadcaster sends through.
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Sends `message` to every live connection not in `exclude`.
    ///
    /// Targets exactly the connections registered when the call starts.
    /// Failed handles are disconnected after every send has completed.
    ///
    /// # Errors
    ///
    /// Only `RegistryError::ChannelClosed`, when no snapshot can be taken.
    /// Send failures are reported through [`BroadcastReport::evicted`].
    pub async fn broadcast(
        &self,
        message: &str,
        exclude: &HashSet<ConnectionKey>,
    ) -> Result<BroadcastReport, RegistryError> {
        let targets: Vec<ConnectionHandle> = self
            .registry
            .snapshot()
            .await?
            .into_iter()
            .map(|(handle, _)| handle)
            .filter(|handle| !exclude.contains(&handle.key()))
            .collect();

        let results = join_all(targets.iter().map(|handle| async move {
            let result = handle.send_text(message).await;
            if result.is_ok() {
                self.registry.touch(handle.key()).await;
            }
            (handle, result)
        }))
        .await;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for (handle, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(key = %handle.key(), error = %e, "Broadcast send failed");
                    failed.push(handle.key());
                }
            }
        }

        // Evict only after the pass so the snapshot stays the target set
        for key in failed {
            self.registry.disconnect(key, RemovalReason::SendFailed).await;
            report.evicted += 1;
        }

        if report.evicted > 0 {
            warn!(
                delivered = report.delivered,
                evicted = report.evicted,
                "Evicted connections during broadcast"
            );
        }

        debug!(
            delivered = report.delivered,
            message = %preview(message, self.preview_len),
            "Broadcast complete"
        );

        Ok(report)
    }

    /// Sends `message` to every live connection.
    pub async fn broadcast_all(&self, message: &str) -> Result<BroadcastReport, RegistryError> {
        self.broadcast(message, &HashSet::new()).await
    }

    /// Sends `message` to a single connection.
    ///
    /// On failure the connection is evicted and the send error returned.
    pub async fn send_personal(
        &self,
        message: &str,
        handle: &ConnectionHandle,
    ) -> Result<(), SendError> {
        match handle.send_text(message).await {
            Ok(()) => {
                self.registry.touch(handle.key()).await;
                debug!(
                    key = %handle.key(),
                    message = %preview(message, self.preview_len),
                    "Personal message sent"
                );
                Ok(())
            }
            Err(e) => {
                warn!(key = %handle.key(), error = %e, "Personal send failed, evicting");
                self.registry
                    .disconnect(handle.key(), RemovalReason::SendFailed)
                    .await;
                Err(e)
            }
        }
    }

    /// Probes one connection for liveness, evicting it on failure.
    pub async fn probe(&self, handle: &ConnectionHandle) -> Result<(), SendError> {
        match handle.send_ping().await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(info) = self
                    .registry
                    .disconnect(handle.key(), RemovalReason::ProbeFailed)
                    .await
                {
                    info!(client_id = %info.id, error = %e, "Removed dead connection");
                }
                Err(e)
            }
        }
    }

    /// Closes every live connection with `code` and `reason`.
    ///
    /// Close errors are logged and suppressed. Every handle in the snapshot
    /// is disconnected whether or not its close succeeded. Returns the
    /// number of connections closed.
    pub async fn close_all(&self, code: u16, reason: &str) -> usize {
        let snapshot = match self.registry.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Cannot snapshot registry for forced close");
                return 0;
            }
        };

        let closed = snapshot.len();

        join_all(snapshot.iter().map(|(handle, info)| async move {
            if let Err(e) = handle.close(code, reason).await {
                debug!(client_id = %info.id, error = %e, "Close failed during forced close");
            }
            self.registry
                .disconnect(handle.key(), RemovalReason::ForceClosed)
                .await;
        }))
        .await;

        info!(closed, code, reason, "Closed all connections");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use crate::transport::testing::{failing_handle, recording_handle};

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(spawn_registry(100), 50)
    }

    #[tokio::test]
    async fn test_broadcast_with_one_failure() {
        let b = broadcaster();
        let (h1, t1) = recording_handle();
        let (h2, t2) = recording_handle();
        let (h3, t3) = recording_handle();
        for h in [&h1, &h2, &h3] {
            b.registry().connect(h, None).await.unwrap();
        }
        t2.set_failing(true);

        let report = b.broadcast_all("hello").await.unwrap();

        assert_eq!(report, BroadcastReport { delivered: 2, evicted: 1 });
        assert_eq!(b.registry().count().await.unwrap(), 2);
        assert_eq!(t1.sent(), vec!["hello"]);
        assert_eq!(t3.sent(), vec!["hello"]);
        assert!(t2.sent().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_respects_exclude() {
        let b = broadcaster();
        let (sender, sender_t) = recording_handle();
        let (other, other_t) = recording_handle();
        b.registry().connect(&sender, None).await.unwrap();
        b.registry().connect(&other, None).await.unwrap();

        let exclude = HashSet::from([sender.key()]);
        let report = b.broadcast("hi", &exclude).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert!(sender_t.sent().is_empty());
        assert_eq!(other_t.sent(), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_broadcast_empty_registry() {
        let b = broadcaster();
        let report = b.broadcast_all("nobody").await.unwrap();
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_broadcast_exactly_one_copy_each() {
        let b = broadcaster();
        let mut transports = Vec::new();
        for _ in 0..5 {
            let (h, t) = recording_handle();
            b.registry().connect(&h, None).await.unwrap();
            transports.push(t);
        }

        b.broadcast_all("once").await.unwrap();

        for t in transports {
            assert_eq!(t.sent(), vec!["once"]);
        }
    }

    #[tokio::test]
    async fn test_send_personal_success() {
        let b = broadcaster();
        let (h, t) = recording_handle();
        b.registry().connect(&h, None).await.unwrap();

        b.send_personal("direct", &h).await.unwrap();
        assert_eq!(t.sent(), vec!["direct"]);
        assert_eq!(b.registry().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_send_personal_failure_isolated() {
        let b = broadcaster();
        let (bad, _) = failing_handle();
        let (good, good_t) = recording_handle();
        b.registry().connect(&bad, None).await.unwrap();
        b.registry().connect(&good, None).await.unwrap();

        let result = b.send_personal("x", &bad).await;
        assert_eq!(result, Err(SendError::Closed));
        assert_eq!(b.registry().count().await.unwrap(), 1);

        b.send_personal("y", &good).await.unwrap();
        assert_eq!(good_t.sent(), vec!["y"]);
    }

    #[tokio::test]
    async fn test_send_personal_to_unregistered_handle() {
        let b = broadcaster();
        let (live, _) = recording_handle();
        b.registry().connect(&live, None).await.unwrap();

        let (gone, _) = failing_handle();
        assert!(b.send_personal("x", &gone).await.is_err());
        assert_eq!(b.registry().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_probe_evicts_dead_connection() {
        let b = broadcaster();
        let (alive, alive_t) = recording_handle();
        let (dead, _) = failing_handle();
        b.registry().connect(&alive, None).await.unwrap();
        b.registry().connect(&dead, None).await.unwrap();

        assert!(b.probe(&alive).await.is_ok());
        assert!(b.probe(&dead).await.is_err());

        assert_eq!(alive_t.pings.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(b.registry().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_all_closes_and_disconnects_everyone() {
        let b = broadcaster();
        let (h1, t1) = recording_handle();
        let (h2, t2) = failing_handle();
        b.registry().connect(&h1, None).await.unwrap();
        b.registry().connect(&h2, None).await.unwrap();

        let closed = b.close_all(1001, "Server shutdown (timeout)").await;

        assert_eq!(closed, 2);
        assert_eq!(b.registry().count().await.unwrap(), 0);
        assert_eq!(t1.close_count(), 1);
        // Close errors are suppressed but the connection is still removed
        assert_eq!(t2.close_count(), 1);
        assert_eq!(
            t1.closes.lock().unwrap()[0],
            (1001, "Server shutdown (timeout)".to_string())
        );
    }
}
