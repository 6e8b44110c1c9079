//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor and for reading or flipping the intake
//! gate.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the workspace panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use beacon_core::{ClientInfo, ConnectionId, ConnectionInfo};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::commands::{RegistryCommand, RegistryError, RemovalReason};
use crate::transport::{ConnectionHandle, ConnectionKey};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// It is the explicit registry instance injected into the broadcaster,
/// the background loops, the shutdown coordinator and the server.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Intake gate shared with the actor
    accepting: Arc<AtomicBool>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    /// * `accepting` - The intake flag the actor checks on every connect
    pub fn new(sender: mpsc::Sender<RegistryCommand>, accepting: Arc<AtomicBool>) -> Self {
        Self { sender, accepting }
    }

    /// Register a live session.
    ///
    /// When registration fails the session is closed here, before the error
    /// is returned: with 1012 when intake is closed, 1008 when the id is
    /// taken, 1013 when the registry is full.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Rejected` if intake is closed
    /// - `RegistryError::IdInUse` if the requested id is live
    /// - `RegistryError::RegistryFull` if the registry is at capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn connect(
        &self,
        handle: &ConnectionHandle,
        requested_id: Option<ConnectionId>,
    ) -> Result<ConnectionId, RegistryError> {
        let result = self.request_connect(handle, requested_id).await;

        if let Err(ref err) = result {
            if let Some((code, reason)) = err.close_frame() {
                if let Err(e) = handle.close(code, reason).await {
                    debug!(key = %handle.key(), error = %e, "Failed to close rejected session");
                }
            }
            info!(key = %handle.key(), error = %err, "Connection not registered");
        }

        result
    }

    async fn request_connect(
        &self,
        handle: &ConnectionHandle,
        requested_id: Option<ConnectionId>,
    ) -> Result<ConnectionId, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Connect {
                handle: handle.clone(),
                requested_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Remove a session.
    ///
    /// Idempotent: returns `None` if the session was already gone (or the
    /// actor has shut down).
    pub async fn disconnect(
        &self,
        key: ConnectionKey,
        reason: RemovalReason,
    ) -> Option<ConnectionInfo> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Disconnect {
                key,
                reason,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Record activity on a session.
    ///
    /// Fire-and-forget: no-op if the session is absent.
    pub async fn touch(&self, key: ConnectionKey) {
        let _ = self.sender.send(RegistryCommand::Touch { key }).await;
    }

    /// Number of live sessions.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn count(&self) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Point-in-time copy of every live session, oldest first.
    ///
    /// The copy is owned by the caller, so it can be iterated while sending
    /// without holding up the registry.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn snapshot(&self) -> Result<Vec<(ConnectionHandle, ConnectionInfo)>, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Resolve a connection id to its handle.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UnknownClientId` if no live session has this id
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn lookup_by_id(&self, id: &ConnectionId) -> Result<ConnectionHandle, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::LookupById {
                id: id.clone(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await
            .map_err(|_| RegistryError::ChannelClosed)?
            .ok_or_else(|| RegistryError::UnknownClientId(id.clone()))
    }

    /// Per-connection metadata for admin display.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn clients(&self) -> Result<Vec<ClientInfo>, RegistryError> {
        let now = Utc::now();
        Ok(self
            .snapshot()
            .await?
            .iter()
            .map(|(_, info)| ClientInfo::from_info(info, now))
            .collect())
    }

    /// Close intake. Returns true for the call that actually flipped it.
    pub fn stop_accepting(&self) -> bool {
        self.accepting.swap(false, Ordering::SeqCst)
    }

    /// Whether new connections are currently accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
