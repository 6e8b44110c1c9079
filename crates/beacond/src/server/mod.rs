//! HTTP and WebSocket server for the Beacon daemon.
//!
//! The server:
//! - Upgrades `GET /ws` requests and runs a `SessionHandler` per client
//! - Serves the administrative JSON endpoints
//! - Stops when the process-wide `CancellationToken` is cancelled
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  DaemonServer   │
//! │  axum::serve    │
//! └───────┬─────────┘
//!         │ GET /ws (upgrade)           GET / , /status
//!         ▼                             POST /notify/*
//! ┌─────────────────┐     ┌─────────────────┐
//! │ SessionHandler  │────▶│   Broadcaster   │
//! │  (per client)   │     │                 │
//! └───────┬─────────┘     └───────┬─────────┘
//!         │ WsTransport           │ snapshot / evict
//!         ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ WebSocket sink  │     │ RegistryHandle  │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the workspace panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-client failures end that session only

mod admin;
mod session;
mod socket;

pub use admin::AdminError;
pub use session::SessionHandler;
pub use socket::WsTransport;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use beacon_core::ConnectionId;
use beacon_protocol::{close, WEBSOCKET_ENDPOINT};
use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::DaemonConfig;
use crate::registry::spawn_registry;
use crate::shutdown::{ShutdownCoordinator, ShutdownSettings};
use crate::transport::ConnectionHandle;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Broadcaster,
    pub coordinator: ShutdownCoordinator,
    pub config: Arc<DaemonConfig>,
    pub cancel_token: CancellationToken,
}

impl AppState {
    /// Spawns the registry and wires the broadcaster and coordinator to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: DaemonConfig, cancel_token: CancellationToken) -> Self {
        let registry = spawn_registry(config.max_connections);
        let broadcaster = Broadcaster::new(registry, config.message_preview_len);
        let coordinator = ShutdownCoordinator::new(
            broadcaster.clone(),
            ShutdownSettings::from(&config),
            cancel_token.clone(),
        );

        Self {
            broadcaster,
            coordinator,
            config: Arc::new(config),
            cancel_token,
        }
    }
}

/// Builds the router with every route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(admin::health))
        .route("/status", get(admin::status))
        .route("/notify/broadcast", post(admin::notify_broadcast))
        .route("/notify/{client_id}", post(admin::notify_client))
        .route(WEBSOCKET_ENDPOINT, get(ws_handler))
        .with_state(state)
}

/// Query string of the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub client_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params.client_id, state))
}

/// Registers an upgraded socket and runs its session.
async fn handle_socket(socket: WebSocket, requested: Option<String>, state: AppState) {
    let (sink, stream) = socket.split();
    let handle = ConnectionHandle::new(Arc::new(WsTransport::new(
        sink,
        state.config.write_timeout(),
    )));

    let requested_id = match requested.as_deref().map(ConnectionId::parse).transpose() {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Rejecting invalid client id");
            if let Err(e) = handle.close(close::POLICY_VIOLATION, "Invalid client id").await {
                debug!(error = %e, "Failed to close session");
            }
            return;
        }
    };

    // connect() has already closed the socket on failure
    let Ok(client_id) = state.broadcaster.registry().connect(&handle, requested_id).await else {
        return;
    };

    info!(client_id = %client_id, key = %handle.key(), "Client connected");

    SessionHandler::new(
        stream,
        handle,
        client_id,
        state.broadcaster.clone(),
        state.config.read_timeout(),
        state.config.message_preview_len,
        state.cancel_token.clone(),
    )
    .run()
    .await;
}

/// HTTP/WebSocket server for the daemon.
pub struct DaemonServer {
    state: AppState,
}

impl DaemonServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Binds the configured address and serves until cancelled.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.state.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;
        self.run_with_listener(listener).await
    }

    /// Serves on an already-bound listener until cancelled.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(local) = listener.local_addr() {
            info!(addr = %local, "Daemon server listening");
        }

        axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(self.state.cancel_token.clone().cancelled_owned())
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("Server shutdown complete");
        Ok(())
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Server error: {0}")]
    Serve(String),
}
