//! Beacon Protocol - Session text protocol and admin payloads
//!
//! This crate provides the text commands exchanged over a WebSocket
//! session, the server-originated notices, the close codes the server
//! uses, and the JSON bodies of the administrative HTTP surface.

pub mod admin;
pub mod message;

pub use admin::{
    BroadcastRequest, BroadcastResponse, ErrorResponse, HealthResponse, PersonalMessageRequest,
    PersonalMessageResponse, StatusResponse, SERVICE_NAME, WEBSOCKET_ENDPOINT,
};
pub use message::{close, preview, ClientCommand, ServerText, BROADCAST_PREFIX, PROBE_TEXT};
