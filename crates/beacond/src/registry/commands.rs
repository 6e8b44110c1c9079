//! Registry actor commands, errors, and removal reasons.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RemovalReason`: Why a connection left the registry
//!
//! All types are designed for async message passing and follow the panic-free policy.

use beacon_core::{ConnectionId, ConnectionInfo};
use beacon_protocol::close;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::transport::{ConnectionHandle, ConnectionKey};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Request/response commands carry a oneshot channel for the reply.
/// `Touch` is fire-and-forget.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a live session.
    ///
    /// # Errors
    /// - `RegistryError::Rejected` if intake is closed
    /// - `RegistryError::IdInUse` if the requested id belongs to a live connection
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Connect {
        /// Handle of the accepted session
        handle: ConnectionHandle,
        /// Client-requested id; generated when absent
        requested_id: Option<ConnectionId>,
        /// Channel to send the assigned id
        respond_to: oneshot::Sender<Result<ConnectionId, RegistryError>>,
    },

    /// Remove a session. Removing an absent session is a no-op.
    Disconnect {
        /// Key of the session to remove
        key: ConnectionKey,
        /// Why it is being removed (for logging)
        reason: RemovalReason,
        /// Channel to send the removed metadata, if it was present
        respond_to: oneshot::Sender<Option<ConnectionInfo>>,
    },

    /// Record activity on a session.
    Touch {
        /// Key of the active session
        key: ConnectionKey,
    },

    /// Number of live sessions.
    Count {
        respond_to: oneshot::Sender<usize>,
    },

    /// Point-in-time copy of every live session, oldest first.
    Snapshot {
        respond_to: oneshot::Sender<Vec<(ConnectionHandle, ConnectionInfo)>>,
    },

    /// Resolve a connection id to its handle.
    LookupById {
        id: ConnectionId,
        respond_to: oneshot::Sender<Option<ConnectionHandle>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Intake is closed because the server is shutting down.
    #[error("connection rejected: server is shutting down")]
    Rejected,

    /// Another live connection already uses the requested id.
    #[error("client id already in use: {0}")]
    IdInUse(ConnectionId),

    /// The registry has reached its maximum connection capacity.
    #[error("registry is full (max: {max} connections)")]
    RegistryFull {
        /// Maximum number of connections allowed
        max: usize,
    },

    /// No live connection has this id.
    #[error("client not connected: {0}")]
    UnknownClientId(ConnectionId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl RegistryError {
    /// Close code and reason for a session whose registration failed.
    ///
    /// Returns `None` for errors that do not come out of `connect`.
    pub fn close_frame(&self) -> Option<(u16, &'static str)> {
        match self {
            Self::Rejected => Some((close::SERVICE_RESTART, close::REASON_SHUTTING_DOWN)),
            Self::IdInUse(_) => Some((close::POLICY_VIOLATION, "Client id already in use")),
            Self::RegistryFull { .. } => {
                Some((close::TRY_AGAIN_LATER, close::REASON_REGISTRY_FULL))
            }
            Self::ChannelClosed => Some((close::SERVICE_RESTART, close::REASON_SHUTTING_DOWN)),
            Self::UnknownClientId(_) => None,
        }
    }
}

// ============================================================================
// Removal Reasons
// ============================================================================

/// Reason why a connection was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The client closed the session or the read side failed.
    ClientClosed,

    /// A send to the client failed.
    SendFailed,

    /// A liveness probe failed.
    ProbeFailed,

    /// Closed by the server at the end of a drain.
    ForceClosed,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "client closed the connection"),
            Self::SendFailed => write!(f, "send failed"),
            Self::ProbeFailed => write!(f, "liveness probe failed"),
            Self::ForceClosed => write!(f, "forced close during shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        assert_eq!(
            RegistryError::Rejected.to_string(),
            "connection rejected: server is shutting down"
        );
        assert_eq!(
            RegistryError::RegistryFull { max: 5 }.to_string(),
            "registry is full (max: 5 connections)"
        );
        assert_eq!(
            RegistryError::UnknownClientId(ConnectionId::new("ghost")).to_string(),
            "client not connected: ghost"
        );
        assert_eq!(
            RegistryError::IdInUse(ConnectionId::new("dup")).to_string(),
            "client id already in use: dup"
        );
    }

    #[test]
    fn test_close_frames() {
        assert_eq!(
            RegistryError::Rejected.close_frame(),
            Some((1012, "Server is restarting / shutting down"))
        );
        assert_eq!(
            RegistryError::IdInUse(ConnectionId::new("x")).close_frame().map(|f| f.0),
            Some(1008)
        );
        assert_eq!(
            RegistryError::RegistryFull { max: 1 }.close_frame().map(|f| f.0),
            Some(1013)
        );
        assert_eq!(RegistryError::UnknownClientId(ConnectionId::new("x")).close_frame(), None);
    }

    #[test]
    fn test_removal_reason_display() {
        assert_eq!(RemovalReason::ProbeFailed.to_string(), "liveness probe failed");
        assert_eq!(
            RemovalReason::ForceClosed.to_string(),
            "forced close during shutdown"
        );
    }
}
