//! Session lifecycle against the in-memory broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::logging::capture_logs;
use parley_core::{ReconnectConfig, UserId};
use parley_transport::{
    ConnectRequest, ConnectionState, Connector, Credentials, FrameCallback, HeartbeatConfig,
    HeartbeatTimings, InboundFrame, Link, MemoryBroker, SessionConfig, SessionHandlers, TransportError,
    TransportSession,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Level;

fn config() -> SessionConfig {
    SessionConfig {
        heartbeat: HeartbeatConfig::DISABLED,
        reconnect: ReconnectConfig::fixed(Duration::from_secs(5)),
        ..SessionConfig::default()
    }
}

fn recorder() -> (FrameCallback, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: FrameCallback = Arc::new(move |frame: &InboundFrame| sink.lock().push(frame.body.clone()));
    (callback, seen)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Holds every handshake until the gate is opened.
struct GatedConnector {
    broker: MemoryBroker,
    gate: Arc<Notify>,
}

#[async_trait]
impl Connector for GatedConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Link, TransportError> {
        self.gate.notified().await;
        self.broker.open(request).await
    }
}

fn gated(broker: &MemoryBroker) -> (Arc<TransportSession>, Arc<Notify>) {
    let gate = Arc::new(Notify::new());
    let connector = GatedConnector {
        broker: broker.clone(),
        gate: Arc::clone(&gate),
    };
    (Arc::new(TransportSession::new(Arc::new(connector), config())), gate)
}

fn connect_in_background(
    session: &Arc<TransportSession>,
    handlers: SessionHandlers,
) -> JoinHandle<Result<(), TransportError>> {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        session
            .connect(UserId::from("u1"), Credentials::anonymous(), handlers)
            .await
    })
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_drop_uses_fixed_delay_and_restores_subscriptions() {
    let broker = MemoryBroker::new();
    let session = TransportSession::new(Arc::new(broker.clone()), config());
    let (callback, seen) = recorder();
    let _ = session.subscribe("/topic/messages/u1", callback);
    session
        .connect(UserId::from("u1"), Credentials::anonymous(), SessionHandlers::new())
        .await
        .unwrap();
    settle().await;

    broker.drop_connections();
    settle().await;
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    tokio::time::sleep(Duration::from_millis(4900)).await;
    settle().await;
    assert_eq!(broker.connect_attempts(), 1, "retried before the fixed delay elapsed");

    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(broker.connect_attempts(), 2);
    assert_eq!(
        broker.subscriptions_of(&UserId::from("u1")),
        vec!["/topic/messages/u1".to_string()]
    );

    let _ = broker.publish("/topic/messages/u1", "back");
    settle().await;
    assert_eq!(*seen.lock(), vec!["back".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn silent_broker_trips_heartbeat_timeout() {
    let broker = MemoryBroker::new().with_heartbeat(HeartbeatTimings {
        send_every: None,
        expect_every: Some(Duration::from_millis(100)),
    });
    let session = TransportSession::new(Arc::new(broker.clone()), config());
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let handlers = SessionHandlers::new().on_error(move |e| sink.lock().push(e.clone()));

    session
        .connect(UserId::from("u1"), Credentials::anonymous(), handlers)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    settle().await;

    assert_eq!(session.state(), ConnectionState::Reconnecting);
    assert!(
        errors
            .lock()
            .iter()
            .any(|e| matches!(e, TransportError::HeartbeatTimeout { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn outgoing_heartbeats_keep_flowing() {
    let broker = MemoryBroker::new().with_heartbeat(HeartbeatTimings {
        send_every: Some(Duration::from_millis(100)),
        expect_every: None,
    });
    let session = TransportSession::new(Arc::new(broker.clone()), config());
    session
        .connect(UserId::from("u1"), Credentials::anonymous(), SessionHandlers::new())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert!(session.is_connected());
    assert_eq!(broker.connection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let session = TransportSession::new(Arc::new(broker.clone()), config());
    let _ = session
        .connect(UserId::from("u1"), Credentials::anonymous(), SessionHandlers::new())
        .await;
    assert_eq!(broker.connect_attempts(), 1);

    session.disconnect();
    broker.set_available(true);
    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;

    assert_eq!(broker.connect_attempts(), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn publish_while_disconnected_logs_a_warning() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let session = TransportSession::new(Arc::new(broker.clone()), config());

    assert!(!session.publish("/topic/messages", "{}"));
    assert!(logs.has_event(Level::WARN, "publish while not connected"));
    assert!(broker.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn state_changes_are_observable() {
    let broker = MemoryBroker::new();
    let session = TransportSession::new(Arc::new(broker.clone()), config());
    let mut states = session.watch_state();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

    session
        .connect(UserId::from("u1"), Credentials::anonymous(), SessionHandlers::new())
        .await
        .unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    session.disconnect();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn handshake_completing_after_disconnect_is_torn_down() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let (session, gate) = gated(&broker);
    let connected = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connected);
    let handlers = SessionHandlers::new().on_connected(move || {
        let _ = counter.fetch_add(1, Ordering::SeqCst);
    });

    let pending = connect_in_background(&session, handlers);
    settle().await;
    assert_eq!(session.state(), ConnectionState::Connecting);

    session.disconnect();
    gate.notify_one();
    settle().await;

    assert_matches!(pending.await.unwrap(), Err(TransportError::Closed));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(connected.load(Ordering::SeqCst), 0);
    assert_eq!(broker.connect_attempts(), 1);
    assert_eq!(broker.connection_count(), 0);
    assert!(logs.has_event(Level::ERROR, "connection completed after disconnect"));
}

#[tokio::test(start_paused = true)]
async fn second_connect_for_same_user_waits_for_pending_handshake() {
    let broker = MemoryBroker::new();
    let (session, gate) = gated(&broker);

    let first = connect_in_background(&session, SessionHandlers::new());
    settle().await;
    let second = connect_in_background(&session, SessionHandlers::new());
    settle().await;
    assert!(!first.is_finished());
    assert!(!second.is_finished());

    gate.notify_one();
    settle().await;

    second.await.unwrap().unwrap();
    first.await.unwrap().unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(broker.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_connect_for_same_user_sees_failed_handshake() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let (session, gate) = gated(&broker);

    let first = connect_in_background(&session, SessionHandlers::new());
    settle().await;
    let second = connect_in_background(&session, SessionHandlers::new());
    settle().await;

    gate.notify_one();
    settle().await;

    assert_matches!(first.await.unwrap(), Err(TransportError::Handshake { .. }));
    assert_matches!(second.await.unwrap(), Err(TransportError::Handshake { .. }));
    assert_eq!(session.state(), ConnectionState::Reconnecting);
}
