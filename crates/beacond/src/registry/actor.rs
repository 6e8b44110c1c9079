//! Registry actor - owns all connection state and processes commands.
//!
//! The RegistryActor is the single owner of connection state in the system.
//! It receives commands via an mpsc channel and answers over oneshot channels.
//! It never performs socket I/O: reads that drive I/O get an owned snapshot
//! back, so a stalled peer can never hold up registry mutations.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the workspace panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Reply send failures are ignored (the caller went away)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use beacon_core::{ConnectionId, ConnectionInfo};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::commands::{RegistryCommand, RegistryError, RemovalReason};
use crate::transport::{ConnectionHandle, ConnectionKey};

/// Default maximum number of live connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// One registered session.
struct Entry {
    handle: ConnectionHandle,
    info: ConnectionInfo,
}

/// The registry actor - owns all connection state.
///
/// # Ownership
///
/// The actor owns:
/// - `connections`: ConnectionKey → (handle, metadata), the primary map
/// - `ids`: ConnectionId → ConnectionKey, the id index
///
/// Both maps are only mutated inside `handle_command`, one command at a
/// time, so every insert and removal touches both maps atomically with
/// respect to every other caller.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Primary storage keyed by handle key
    connections: HashMap<ConnectionKey, Entry>,

    /// Index for id → key lookups
    ids: HashMap<ConnectionId, ConnectionKey>,

    /// Intake gate, shared with every `RegistryHandle`
    accepting: Arc<AtomicBool>,

    /// Capacity limit
    max_connections: usize,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `accepting` - Intake flag shared with the handles
    /// * `max_connections` - Capacity limit
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        accepting: Arc<AtomicBool>,
        max_connections: usize,
    ) -> Self {
        Self {
            receiver,
            connections: HashMap::new(),
            ids: HashMap::new(),
            accepting,
            max_connections,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!(max_connections = self.max_connections, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            connections = self.connections.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Connect {
                handle,
                requested_id,
                respond_to,
            } => {
                let result = self.handle_connect(handle, requested_id);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Disconnect {
                key,
                reason,
                respond_to,
            } => {
                let result = self.handle_disconnect(key, reason);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Touch { key } => {
                if let Some(entry) = self.connections.get_mut(&key) {
                    entry.info.touch(Utc::now());
                }
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.connections.len());
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.handle_snapshot());
            }
            RegistryCommand::LookupById { id, respond_to } => {
                let result = self
                    .ids
                    .get(&id)
                    .and_then(|key| self.connections.get(key))
                    .map(|entry| entry.handle.clone());
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_connect(
        &mut self,
        handle: ConnectionHandle,
        requested_id: Option<ConnectionId>,
    ) -> Result<ConnectionId, RegistryError> {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(key = %handle.key(), "Intake closed, rejecting connection");
            return Err(RegistryError::Rejected);
        }

        let key = handle.key();
        if let Some(entry) = self.connections.get(&key) {
            // Same handle registered twice: hand back the existing id
            return Ok(entry.info.id.clone());
        }

        if self.connections.len() >= self.max_connections {
            warn!(
                current = self.connections.len(),
                max = self.max_connections,
                "Registry is full, rejecting connection"
            );
            return Err(RegistryError::RegistryFull {
                max: self.max_connections,
            });
        }

        let id = match requested_id {
            Some(id) if self.ids.contains_key(&id) => {
                debug!(client_id = %id, "Requested client id already live");
                return Err(RegistryError::IdInUse(id));
            }
            Some(id) => id,
            None => self.generate_id(),
        };

        let info = ConnectionInfo::new(id.clone(), Utc::now());
        self.ids.insert(id.clone(), key);
        self.connections.insert(key, Entry { handle, info });

        info!(
            client_id = %id,
            key = %key,
            active = self.connections.len(),
            "Connection registered"
        );

        Ok(id)
    }

    /// Generates an id not currently in use.
    fn generate_id(&self) -> ConnectionId {
        loop {
            let id = ConnectionId::generate();
            if !self.ids.contains_key(&id) {
                return id;
            }
        }
    }

    fn handle_disconnect(
        &mut self,
        key: ConnectionKey,
        reason: RemovalReason,
    ) -> Option<ConnectionInfo> {
        let entry = self.connections.remove(&key)?;
        self.ids.remove(&entry.info.id);

        info!(
            client_id = %entry.info.id,
            reason = %reason,
            active = self.connections.len(),
            "Connection removed"
        );

        Some(entry.info)
    }

    fn handle_snapshot(&self) -> Vec<(ConnectionHandle, ConnectionInfo)> {
        let mut snapshot: Vec<_> = self
            .connections
            .values()
            .map(|entry| (entry.handle.clone(), entry.info.clone()))
            .collect();
        snapshot.sort_by(|a, b| {
            a.1.connected_at
                .cmp(&b.1.connected_at)
                .then_with(|| a.0.key().cmp(&b.0.key()))
        });
        snapshot
    }

    /// Returns the number of live connections (for testing).
    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
