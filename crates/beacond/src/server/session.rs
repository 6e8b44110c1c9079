//! Per-client WebSocket session.
//!
//! Each upgraded socket gets its own `SessionHandler` that:
//! - Greets the client with its assigned id
//! - Answers pings, relays `/broadcast` commands, echoes everything else
//! - Probes the peer after a long silence
//! - Leaves the registry when the socket ends
//!
//! # Panic-Free Guarantees
//!
//! This module follows the workspace panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Socket errors end the session; they are logged, never raised

use std::collections::HashSet;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use beacon_core::ConnectionId;
use beacon_protocol::{preview, ClientCommand, ServerText};
use futures::stream::SplitStream;
use futures::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::registry::RemovalReason;
use crate::transport::{ConnectionHandle, SendError};

/// Message-processing loop for one registered client.
pub struct SessionHandler {
    stream: SplitStream<WebSocket>,
    handle: ConnectionHandle,
    client_id: ConnectionId,
    broadcaster: Broadcaster,
    read_timeout: Duration,
    preview_len: usize,
    cancel_token: CancellationToken,
}

impl SessionHandler {
    pub fn new(
        stream: SplitStream<WebSocket>,
        handle: ConnectionHandle,
        client_id: ConnectionId,
        broadcaster: Broadcaster,
        read_timeout: Duration,
        preview_len: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            stream,
            handle,
            client_id,
            broadcaster,
            read_timeout,
            preview_len,
            cancel_token,
        }
    }

    /// Runs the session until the socket closes, a send fails, a probe fails
    /// or the daemon stops. The client is disconnected on return.
    pub async fn run(mut self) {
        let welcome = ServerText::Welcome {
            client_id: &self.client_id,
        }
        .to_string();

        let reason = match self.broadcaster.send_personal(&welcome, &self.handle).await {
            Ok(()) => self.process_messages().await,
            Err(_) => RemovalReason::SendFailed,
        };

        if let Some(info) = self
            .broadcaster
            .registry()
            .disconnect(self.handle.key(), reason)
            .await
        {
            info!(
                client_id = %self.client_id,
                connected_secs = info.connection_duration(chrono::Utc::now()).num_seconds(),
                "Client disconnected"
            );
        }
    }

    async fn process_messages(&mut self) -> RemovalReason {
        loop {
            let frame = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => return RemovalReason::ForceClosed,

                frame = timeout(self.read_timeout, self.stream.next()) => frame,
            };

            let message = match frame {
                Err(_) => {
                    debug!(client_id = %self.client_id, "Read timeout, probing client");
                    if self.broadcaster.probe(&self.handle).await.is_err() {
                        return RemovalReason::ProbeFailed;
                    }
                    continue;
                }
                Ok(None) => return RemovalReason::ClientClosed,
                Ok(Some(Err(e))) => {
                    debug!(client_id = %self.client_id, error = %e, "Socket read failed");
                    return RemovalReason::ClientClosed;
                }
                Ok(Some(Ok(message))) => message,
            };

            self.broadcaster.registry().touch(self.handle.key()).await;

            match message {
                Message::Text(text) => {
                    if self.handle_text(text.as_str()).await.is_err() {
                        return RemovalReason::SendFailed;
                    }
                }
                Message::Close(frame) => {
                    debug!(client_id = %self.client_id, ?frame, "Client sent close");
                    return RemovalReason::ClientClosed;
                }
                // Control frames only count as activity; axum answers pings
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(data) => {
                    debug!(client_id = %self.client_id, len = data.len(), "Ignoring binary frame");
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) -> Result<(), SendError> {
        debug!(
            client_id = %self.client_id,
            message = %preview(text, self.preview_len),
            "Received message"
        );

        match ClientCommand::parse(text) {
            ClientCommand::Ping => self.reply(ServerText::Pong).await,
            ClientCommand::Broadcast(payload) => {
                let relay = ServerText::BroadcastFrom {
                    sender: &self.client_id,
                    text: payload,
                }
                .to_string();
                let exclude = HashSet::from([self.handle.key()]);

                match self.broadcaster.broadcast(&relay, &exclude).await {
                    Ok(report) => info!(
                        client_id = %self.client_id,
                        delivered = report.delivered,
                        "Client broadcast relayed"
                    ),
                    Err(e) => debug!(client_id = %self.client_id, error = %e, "Client broadcast failed"),
                }

                self.reply(ServerText::BroadcastAck).await
            }
            ClientCommand::Echo(payload) => self.reply(ServerText::Echo { text: payload }).await,
        }
    }

    async fn reply(&self, text: ServerText<'_>) -> Result<(), SendError> {
        self.broadcaster
            .send_personal(&text.to_string(), &self.handle)
            .await
    }
}
