//! Shutdown phases.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Phase of the process-wide shutdown state machine.
///
/// Phases only move forward:
/// `Running → Draining → ForceClosing → Terminated`.
/// `Draining → Terminated` is allowed when every client leaves on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ShutdownPhase {
    /// Accepting and serving connections
    Running = 0,

    /// Intake closed, waiting for clients to leave
    Draining = 1,

    /// Drain budget exhausted, closing every connection
    ForceClosing = 2,

    /// Shutdown sequence complete
    Terminated = 3,
}

impl ShutdownPhase {
    /// Encodes the phase for atomic storage.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a phase from atomic storage.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Running),
            1 => Some(Self::Draining),
            2 => Some(Self::ForceClosing),
            3 => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Returns true once a shutdown has been started.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self != Self::Running
    }

    /// Returns true if moving to `next` is a legal forward step.
    pub fn can_advance_to(&self, next: ShutdownPhase) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Draining)
                | (Self::Draining, Self::ForceClosing)
                | (Self::Draining, Self::Terminated)
                | (Self::ForceClosing, Self::Terminated)
        )
    }

    /// Validates a transition, returning the new phase.
    pub fn advance(self, next: ShutdownPhase) -> DomainResult<ShutdownPhase> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(DomainError::IllegalTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::ForceClosing => "force_closing",
            Self::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}
