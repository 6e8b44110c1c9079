//! Connection identity and metadata.
//!
//! A live WebSocket session is described by a [`ConnectionInfo`]: the
//! client-visible [`ConnectionId`] plus the timestamps the registry keeps
//! up to date. [`ClientInfo`] is the read-only view handed to the admin
//! surface.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Longest client-supplied connection id accepted.
pub const MAX_CONNECTION_ID_LEN: usize = 128;

/// Prefix for server-generated connection ids.
const GENERATED_PREFIX: &str = "client-";

/// Unique identifier of a live connection.
///
/// Either supplied by the client on the upgrade request (`?client_id=`)
/// or generated by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a ConnectionId without validation.
    ///
    /// Use [`ConnectionId::parse`] for untrusted input.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, globally unique id (`client-<uuid>`).
    pub fn generate() -> Self {
        Self(format!("{GENERATED_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Validates a client-supplied id.
    ///
    /// Ids must be non-empty, at most [`MAX_CONNECTION_ID_LEN`] bytes and
    /// free of whitespace and control characters.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let invalid = |expected: &str| DomainError::InvalidFieldValue {
            field: "client_id".to_string(),
            value: raw.chars().take(MAX_CONNECTION_ID_LEN).collect(),
            expected: expected.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("a non-empty string"));
        }
        if raw.len() > MAX_CONNECTION_ID_LEN {
            return Err(invalid("at most 128 bytes"));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid("no whitespace or control characters"));
        }

        Ok(Self(raw.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the server generated this id.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.0.starts_with(GENERATED_PREFIX)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Registry metadata for one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Client-visible id, unique among live connections.
    pub id: ConnectionId,

    /// When the connection was registered.
    pub connected_at: DateTime<Utc>,

    /// Last successful send or inbound activity.
    pub last_active: DateTime<Utc>,
}

impl ConnectionInfo {
    /// Creates metadata for a connection registered at `now`.
    pub fn new(id: ConnectionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            connected_at: now,
            last_active: now,
        }
    }

    /// Records activity. Timestamps never move backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_active {
            self.last_active = now;
        }
    }

    /// Time since registration, measured at `now`.
    pub fn connection_duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.connected_at)
    }

    /// Time since the last recorded activity, measured at `now`.
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_active)
    }
}

/// Admin view of a connection, as reported by `/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Connection id
    pub id: ConnectionId,

    /// Registration time
    pub connected_at: DateTime<Utc>,

    /// Last activity time
    pub last_active: DateTime<Utc>,

    /// Seconds since registration
    pub connection_duration: f64,
}

impl ClientInfo {
    /// Builds the admin view from registry metadata.
    pub fn from_info(info: &ConnectionInfo, now: DateTime<Utc>) -> Self {
        let millis = info.connection_duration(now).num_milliseconds().max(0);
        Self {
            id: info.id.clone(),
            connected_at: info.connected_at,
            last_active: info.last_active,
            connection_duration: millis as f64 / 1000.0,
        }
    }
}
