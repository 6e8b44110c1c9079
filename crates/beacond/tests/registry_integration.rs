//! Integration tests for the registry and broadcaster.
//!
//! These tests drive `spawn_registry()` and `Broadcaster` through their
//! public interfaces with an in-memory transport, including concurrent
//! connect/disconnect/broadcast traffic.
//!
//! Tests CAN use `.unwrap()` and `.expect()`. The panic-free behavior of
//! production code is checked through assertions.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_core::ConnectionId;
use beacond::broadcast::Broadcaster;
use beacond::registry::{spawn_registry, RegistryError, RemovalReason};
use beacond::transport::{ConnectionHandle, SendError, Transport};

// ============================================================================
// Test Helpers
// ============================================================================

/// In-memory transport that records frames and can be told to fail.
#[derive(Default)]
struct FakeTransport {
    sent: Mutex<Vec<String>>,
    closes: Mutex<Vec<(u16, String)>>,
    fail: AtomicBool,
}

impl FakeTransport {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), SendError> {
        self.closes.lock().unwrap().push((code, reason.to_string()));
        Ok(())
    }
}

fn fake() -> (ConnectionHandle, Arc<FakeTransport>) {
    let transport = Arc::new(FakeTransport::default());
    (ConnectionHandle::new(transport.clone()), transport)
}

fn broadcaster(max: usize) -> Broadcaster {
    Broadcaster::new(spawn_registry(max), 50)
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_count_tracks_connect_and_disconnect() {
    let registry = spawn_registry(100);
    let mut live = Vec::new();

    for i in 0..10 {
        let (handle, _) = fake();
        registry.connect(&handle, None).await.unwrap();
        live.push(handle);

        // Drop every third connection as we go
        if i % 3 == 2 {
            let gone = live.remove(0);
            registry.disconnect(gone.key(), RemovalReason::ClientClosed).await;
        }
        assert_eq!(registry.count().await.unwrap(), live.len());
    }

    for handle in live.drain(..) {
        registry.disconnect(handle.key(), RemovalReason::ClientClosed).await;
    }
    assert_eq!(registry.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_disconnect_returns_metadata_once() {
    let registry = spawn_registry(10);
    let (handle, _) = fake();
    registry
        .connect(&handle, Some(ConnectionId::new("alice")))
        .await
        .unwrap();

    let info = registry
        .disconnect(handle.key(), RemovalReason::ClientClosed)
        .await
        .expect("first disconnect returns metadata");
    assert_eq!(info.id.as_str(), "alice");

    assert!(registry
        .disconnect(handle.key(), RemovalReason::ClientClosed)
        .await
        .is_none());
    assert!(matches!(
        registry.lookup_by_id(&ConnectionId::new("alice")).await,
        Err(RegistryError::UnknownClientId(_))
    ));
}

#[tokio::test]
async fn test_rejected_when_not_accepting() {
    let registry = spawn_registry(10);
    let (existing, _) = fake();
    registry.connect(&existing, None).await.unwrap();

    assert!(registry.stop_accepting());

    let (late, late_transport) = fake();
    let result = registry.connect(&late, None).await;

    assert_eq!(result, Err(RegistryError::Rejected));
    assert_eq!(registry.count().await.unwrap(), 1);
    assert_eq!(
        late_transport.closes.lock().unwrap().as_slice(),
        &[(1012, "Server is restarting / shutting down".to_string())]
    );
}

#[tokio::test]
async fn test_clients_listing() {
    let registry = spawn_registry(10);
    let (a, _) = fake();
    let (b, _) = fake();
    registry.connect(&a, Some(ConnectionId::new("a"))).await.unwrap();
    registry.connect(&b, Some(ConnectionId::new("b"))).await.unwrap();

    let clients = registry.clients().await.unwrap();
    let ids: Vec<_> = clients.iter().map(|c| c.id.as_str().to_string()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(clients.iter().all(|c| c.connection_duration >= 0.0));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connects_never_share_an_id() {
    let registry = spawn_registry(1000);
    let mut tasks = Vec::new();

    for _ in 0..50 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let (handle, _) = fake();
            registry
                .connect(&handle, Some(ConnectionId::new("shared")))
                .await
        }));
    }

    let mut won = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => won += 1,
            Err(RegistryError::IdInUse(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(registry.count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generated_ids_are_unique_under_load() {
    let registry = spawn_registry(1000);
    let mut tasks = Vec::new();

    for _ in 0..100 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let (handle, _) = fake();
            let id = registry.connect(&handle, None).await.unwrap();
            (handle, id)
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        let (_, id) = task.await.unwrap();
        assert!(ids.insert(id));
    }
    assert_eq!(registry.count().await.unwrap(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_during_churn() {
    let b = broadcaster(1000);

    // Stable clients that must receive every broadcast
    let mut stable = Vec::new();
    for _ in 0..5 {
        let (handle, transport) = fake();
        b.registry().connect(&handle, None).await.unwrap();
        stable.push((handle, transport));
    }

    let churn_registry = b.registry().clone();
    let churn = tokio::spawn(async move {
        for _ in 0..50 {
            let (handle, _) = fake();
            churn_registry.connect(&handle, None).await.unwrap();
            churn_registry
                .disconnect(handle.key(), RemovalReason::ClientClosed)
                .await;
        }
    });

    for i in 0..10 {
        b.broadcast_all(&format!("msg-{i}")).await.unwrap();
    }
    churn.await.unwrap();

    for (_, transport) in &stable {
        let expected: Vec<String> = (0..10).map(|i| format!("msg-{i}")).collect();
        assert_eq!(transport.sent(), expected);
    }
    assert_eq!(b.registry().count().await.unwrap(), 5);
}

// ============================================================================
// Broadcaster
// ============================================================================

#[tokio::test]
async fn test_three_connections_one_failure() {
    let b = broadcaster(10);
    let (h1, t1) = fake();
    let (h2, t2) = fake();
    let (h3, t3) = fake();
    for h in [&h1, &h2, &h3] {
        b.registry().connect(h, None).await.unwrap();
    }
    t2.fail();

    let report = b.broadcast_all("hello").await.unwrap();

    assert_eq!(report.delivered, 2);
    assert_eq!(report.evicted, 1);
    assert_eq!(b.registry().count().await.unwrap(), 2);
    assert_eq!(t1.sent(), vec!["hello"]);
    assert_eq!(t3.sent(), vec!["hello"]);
}

#[tokio::test]
async fn test_personal_send_to_departed_client() {
    let b = broadcaster(10);
    let (gone, gone_t) = fake();
    let (stay, stay_t) = fake();
    b.registry().connect(&gone, None).await.unwrap();
    b.registry().connect(&stay, None).await.unwrap();

    b.registry()
        .disconnect(gone.key(), RemovalReason::ClientClosed)
        .await;
    gone_t.fail();

    assert_eq!(b.send_personal("late", &gone).await, Err(SendError::Closed));
    assert_eq!(b.registry().count().await.unwrap(), 1);

    b.broadcast_all("still here").await.unwrap();
    assert_eq!(stay_t.sent(), vec!["still here"]);
}

#[tokio::test]
async fn test_close_all_empties_registry() {
    let b = broadcaster(10);
    let mut transports = Vec::new();
    for _ in 0..4 {
        let (handle, transport) = fake();
        b.registry().connect(&handle, None).await.unwrap();
        transports.push(transport);
    }

    assert_eq!(b.close_all(1001, "Server shutdown (timeout)").await, 4);
    assert_eq!(b.registry().count().await.unwrap(), 0);
    for t in transports {
        assert_eq!(t.closes.lock().unwrap().len(), 1);
    }
}
