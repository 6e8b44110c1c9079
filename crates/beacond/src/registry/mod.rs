//! Connection registry using the Actor pattern.
//!
//! The registry is the single owner of live-connection state. It receives
//! commands via a tokio mpsc channel and maintains both the
//! handle → metadata map and the id → handle index.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ Session handler │────▶│  RegistryActor  │
//! │  Broadcaster    │     │                 │
//! │  Sweeper        │     │ HashMap<Key,    │
//! │  Notifier       │     │   (Handle,Info)>│
//! │  Shutdown       │     │ HashMap<Id,Key> │
//! └─────────────────┘     └─────────────────┘
//!         │   RegistryCommand        │
//!         │   (mpsc channel)         │ replies / snapshots
//!         ▼                          ▼
//!    connect/disconnect        owned copies, I/O happens
//!    touch/lookup              outside the actor
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, DEFAULT_MAX_CONNECTIONS};
pub use commands::{RegistryCommand, RegistryError, RemovalReason};
pub use handle::RegistryHandle;

/// Channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// The registry starts with intake open.
///
/// # Example
///
/// ```no_run
/// use beacond::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let registry = spawn_registry(1_000);
///     let active = registry.count().await.unwrap_or(0);
/// }
/// ```
pub fn spawn_registry(max_connections: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let accepting = Arc::new(AtomicBool::new(true));

    let actor = RegistryActor::new(cmd_rx, Arc::clone(&accepting), max_connections);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, accepting)
}
