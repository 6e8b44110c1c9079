//! Beacon Core - Shared types for the Beacon notification server
//!
//! This crate provides the domain types shared between the daemon
//! (beacond) and the wire protocol (beacon-protocol).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod connection;
pub mod error;
pub mod shutdown;

// Re-exports for convenience
pub use connection::{ClientInfo, ConnectionId, ConnectionInfo, MAX_CONNECTION_ID_LEN};
pub use error::{DomainError, DomainResult};
pub use shutdown::ShutdownPhase;
