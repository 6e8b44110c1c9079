//! axum WebSocket adapter for the [`Transport`] trait.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::transport::{SendError, Transport};

/// Write half of an upgraded WebSocket.
///
/// The sink sits behind its own mutex so concurrent broadcasts, personal
/// sends and probes to the same peer are serialized without involving the
/// registry. Every write is bounded by `write_timeout`.
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    write_timeout: Duration,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>, write_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            write_timeout,
        }
    }

    async fn send(&self, message: Message) -> Result<(), SendError> {
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(message).await
        };

        match timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SendError::Transport(e.to_string())),
            Err(_) => Err(SendError::Timeout(self.write_timeout)),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.send(Message::Text(text.into())).await
    }

    /// Sends a control-frame ping.
    async fn send_ping(&self) -> Result<(), SendError> {
        self.send(Message::Ping(Vec::new().into())).await
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), SendError> {
        self.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await
    }
}
