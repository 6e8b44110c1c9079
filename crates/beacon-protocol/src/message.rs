//! Session text protocol.
//!
//! Clients speak plain text frames:
//! - `ping` (any case, surrounding whitespace ignored) is answered with `pong`
//! - `/broadcast <text>` fans `<text>` out to every other live client
//! - anything else is echoed back as `Echo: <text>`
//!
//! Server-originated frames are rendered from [`ServerText`].

use std::borrow::Cow;
use std::fmt;

use beacon_core::ConnectionId;

/// Text sentinel used as a liveness probe when a transport has no
/// control-frame ping.
pub const PROBE_TEXT: &str = "ping";

/// Prefix of the client broadcast command (note the trailing space).
pub const BROADCAST_PREFIX: &str = "/broadcast ";

/// WebSocket close codes and reasons used by the server.
pub mod close {
    /// Server is going away (forced close at the end of a drain).
    pub const GOING_AWAY: u16 = 1001;

    /// The requested client id is invalid or already in use.
    pub const POLICY_VIOLATION: u16 = 1008;

    /// Intake is closed because the server is shutting down.
    pub const SERVICE_RESTART: u16 = 1012;

    /// The registry is at capacity.
    pub const TRY_AGAIN_LATER: u16 = 1013;

    /// Reason sent with [`SERVICE_RESTART`].
    pub const REASON_SHUTTING_DOWN: &str = "Server is restarting / shutting down";

    /// Reason sent with [`GOING_AWAY`] when the drain budget runs out.
    pub const REASON_SHUTDOWN_TIMEOUT: &str = "Server shutdown (timeout)";

    /// Reason sent with [`TRY_AGAIN_LATER`].
    pub const REASON_REGISTRY_FULL: &str = "Too many connections";
}

/// A parsed inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand<'a> {
    /// Application-level ping
    Ping,

    /// Fan the payload out to every other client
    Broadcast(&'a str),

    /// Anything else: echo it back
    Echo(&'a str),
}

impl<'a> ClientCommand<'a> {
    /// Classifies an inbound text frame. Never fails.
    pub fn parse(text: &'a str) -> Self {
        if text.trim().eq_ignore_ascii_case(PROBE_TEXT) {
            return Self::Ping;
        }

        match text.strip_prefix(BROADCAST_PREFIX) {
            Some(payload) => Self::Broadcast(payload),
            None => Self::Echo(text),
        }
    }
}

/// Text frames originated by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerText<'a> {
    /// Greeting sent right after registration
    Welcome { client_id: &'a ConnectionId },

    /// Reply to a client ping
    Pong,

    /// Reply to an unrecognized frame
    Echo { text: &'a str },

    /// A client broadcast relayed to the other clients
    BroadcastFrom {
        sender: &'a ConnectionId,
        text: &'a str,
    },

    /// Confirmation sent to the originator of a broadcast
    BroadcastAck,

    /// Periodic status notification
    Periodic { counter: u64, active_clients: usize },

    /// Notice sent while the server drains
    ShuttingDown { remaining_secs: u64 },
}

impl fmt::Display for ServerText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Welcome { client_id } => write!(f, "Welcome! Your client ID: {client_id}"),
            Self::Pong => write!(f, "pong"),
            Self::Echo { text } => write!(f, "Echo: {text}"),
            Self::BroadcastFrom { sender, text } => {
                write!(f, "[Broadcast from {sender}]: {text}")
            }
            Self::BroadcastAck => write!(f, "Message broadcasted to all clients"),
            Self::Periodic {
                counter,
                active_clients,
            } => write!(
                f,
                "[System] Periodic notification #{counter} - Active clients: {active_clients}"
            ),
            Self::ShuttingDown { remaining_secs } => write!(
                f,
                "[System] Server is shutting down. Remaining ~{remaining_secs} sec..."
            ),
        }
    }
}

/// Truncates `text` to at most `max_chars` characters for logging and
/// admin display, marking the cut with `...`.
pub fn preview(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &text[..cut])),
        None => Cow::Borrowed(text),
    }
}
