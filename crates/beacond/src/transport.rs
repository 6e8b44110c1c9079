//! Transport seam between the registry and the socket layer.
//!
//! The registry, broadcaster and shutdown coordinator never touch a socket
//! directly. They hold [`ConnectionHandle`]s, which wrap any [`Transport`]
//! implementation: the axum WebSocket adapter in production, in-memory fakes
//! in tests.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the workspace panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Send failures are returned as `SendError` values, never raised

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_protocol::PROBE_TEXT;

/// Source of process-unique connection keys.
static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Errors returned by a transport send or close.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound capabilities of one duplex session.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a text frame.
    async fn send_text(&self, text: &str) -> Result<(), SendError>;

    /// Sends a liveness probe.
    ///
    /// Transports with protocol-level control frames override this with a
    /// real ping. The default sends the [`PROBE_TEXT`] sentinel.
    async fn send_ping(&self) -> Result<(), SendError> {
        self.send_text(PROBE_TEXT).await
    }

    /// Closes the session with a status code and reason.
    async fn close(&self, code: u16, reason: &str) -> Result<(), SendError>;
}

/// Registry key of a connection, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(u64);

impl ConnectionKey {
    fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw key value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque, cheap-to-clone handle to one live session.
///
/// Handles compare and hash by their [`ConnectionKey`], so two clones of the
/// same handle are equal and handles to different sessions never are.
#[derive(Clone)]
pub struct ConnectionHandle {
    key: ConnectionKey,
    transport: Arc<dyn Transport>,
}

impl ConnectionHandle {
    /// Wraps a transport under a fresh key.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            key: ConnectionKey::next(),
            transport,
        }
    }

    /// Returns the registry key.
    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub async fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.transport.send_text(text).await
    }

    pub async fn send_ping(&self) -> Result<(), SendError> {
        self.transport.send_ping().await
    }

    pub async fn close(&self, code: u16, reason: &str) -> Result<(), SendError> {
        self.transport.close(code, reason).await
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// In-memory transport used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    use super::*;

    /// Records every frame and can be told to fail.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<String>>,
        pub pings: AtomicU64,
        pub closes: Mutex<Vec<(u16, String)>>,
        pub fail: AtomicBool,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            let t = Self::default();
            t.fail.store(true, Ordering::SeqCst);
            t
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub fn close_count(&self) -> usize {
            self.closes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(&self, text: &str) -> Result<(), SendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SendError::Closed);
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_ping(&self) -> Result<(), SendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SendError::Closed);
            }
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self, code: u16, reason: &str) -> Result<(), SendError> {
            self.closes.lock().unwrap().push((code, reason.to_string()));
            if self.fail.load(Ordering::SeqCst) {
                return Err(SendError::Transport("close failed".to_string()));
            }
            Ok(())
        }
    }

    /// Builds a handle over a fresh recording transport.
    pub fn recording_handle() -> (ConnectionHandle, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        (ConnectionHandle::new(transport.clone()), transport)
    }

    /// Builds a handle whose sends always fail.
    pub fn failing_handle() -> (ConnectionHandle, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::failing());
        (ConnectionHandle::new(transport.clone()), transport)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::collections::HashSet;

    /// Transport relying on the default text-sentinel probe.
    struct TextOnly(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl Transport for TextOnly {
        async fn send_text(&self, text: &str) -> Result<(), SendError> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn close(&self, _code: u16, _reason: &str) -> Result<(), SendError> {
            Ok(())
        }
    }

    #[test]
    fn test_keys_are_unique() {
        let (a, _) = recording_handle();
        let (b, _) = recording_handle();
        assert_ne!(a.key(), b.key());
        assert_ne!(a, b);
    }

    #[test]
    fn test_clones_are_equal() {
        let (a, _) = recording_handle();
        let b = a.clone();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[tokio::test]
    async fn test_default_probe_uses_text_sentinel() {
        let transport = Arc::new(TextOnly(std::sync::Mutex::new(Vec::new())));
        let handle = ConnectionHandle::new(transport.clone());

        handle.send_ping().await.unwrap();
        assert_eq!(*transport.0.lock().unwrap(), vec![PROBE_TEXT.to_string()]);
    }

    #[tokio::test]
    async fn test_failing_transport_reports_error() {
        let (handle, transport) = failing_handle();
        assert_eq!(handle.send_text("x").await, Err(SendError::Closed));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_send_error_display() {
        let err = SendError::Timeout(Duration::from_secs(10));
        assert!(err.to_string().contains("10s"));
        assert_eq!(SendError::Closed.to_string(), "connection closed");
    }
}
