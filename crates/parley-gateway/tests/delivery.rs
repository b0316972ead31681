//! Delivery guarantees across several gateways sharing one in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use parley_core::{ConsumerId, Message, MessageDraft, ReconnectConfig, TopicNames, UserId};
use parley_gateway::{Acceptance, Conversation, GatewayConfig, GatewayState, MessageGateway, SendError};
use parley_transport::{Credentials, HeartbeatConfig, MemoryBroker, SessionConfig, TransportSession};

type Inbox = Arc<Mutex<Vec<Message>>>;

fn broker() -> MemoryBroker {
    MemoryBroker::new().with_app_relay(TopicNames::default())
}

fn gateway(broker: &MemoryBroker) -> MessageGateway {
    let config = SessionConfig {
        heartbeat: HeartbeatConfig::DISABLED,
        reconnect: ReconnectConfig::fixed(Duration::from_secs(5)),
        ..SessionConfig::default()
    };
    let session = Arc::new(TransportSession::new(Arc::new(broker.clone()), config));
    MessageGateway::new(session, GatewayConfig::default())
}

async fn online(broker: &MemoryBroker, user: &str) -> MessageGateway {
    let gw = gateway(broker);
    gw.connect(UserId::from(user), Credentials::bearer(format!("token-{user}")))
        .await
        .unwrap();
    settle().await;
    gw
}

fn inbox(gw: &MessageGateway, user: &str, consumer: &str) -> Inbox {
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inbox);
    let _ = gw.register_handler(UserId::from(user), ConsumerId::from(consumer), move |m| {
        sink.lock().push(m.clone());
    });
    inbox
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn recipient_and_senders_second_tab_each_get_exactly_one_copy() {
    let broker = broker();
    let u1 = online(&broker, "u1").await;
    let u2 = online(&broker, "u2").await;
    let u3 = online(&broker, "u3").await;

    let u1_view = inbox(&u1, "u1", "chat-u2");
    let u2_tab_a = inbox(&u2, "u2", "tab-a");
    let u2_tab_b = inbox(&u2, "u2", "tab-b");
    let u3_view = inbox(&u3, "u3", "chat");

    let sent = u2.send(MessageDraft::new("u2", "u1", "m1")).unwrap();
    settle().await;

    // Global echo plus personal copy arrive for both participants.
    assert_eq!(broker.published_to("/topic/messages").len(), 1);
    assert_eq!(broker.published_to("/app/chat").len(), 1);
    assert_eq!(broker.published_to("/topic/messages/u1").len(), 1);

    assert_eq!(*u1_view.lock(), vec![sent.clone()]);
    assert_eq!(*u2_tab_a.lock(), vec![sent.clone()]);
    assert_eq!(*u2_tab_b.lock(), vec![sent]);
    assert!(u3_view.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn redelivered_id_is_suppressed() {
    let broker = broker();
    let u1 = online(&broker, "u1").await;
    let view = inbox(&u1, "u1", "chat");

    let message = Message::compose(MessageDraft::new("u2", "u1", "again")).unwrap();
    let body = message.to_json().unwrap();
    let _ = broker.publish("/topic/messages/u1", &body);
    let _ = broker.publish("/topic/messages", &body);
    let _ = broker.publish("/topic/messages/u1", &body);
    settle().await;

    assert_eq!(view.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn late_registration_sees_only_new_messages_once() {
    let broker = broker();
    let u1 = online(&broker, "u1").await;
    let first = inbox(&u1, "u1", "first");

    let m1 = Message::compose(MessageDraft::new("u2", "u1", "one")).unwrap();
    let _ = broker.publish("/topic/messages/u1", &m1.to_json().unwrap());
    settle().await;

    let second = inbox(&u1, "u1", "second");
    let m2 = Message::compose(MessageDraft::new("u2", "u1", "two")).unwrap();
    let _ = broker.publish("/topic/messages", &m2.to_json().unwrap());
    let _ = broker.publish("/topic/messages/u1", &m2.to_json().unwrap());
    settle().await;

    assert_eq!(first.lock().len(), 2);
    assert_eq!(*second.lock(), vec![m2]);
}

#[tokio::test(start_paused = true)]
async fn unregistered_view_stops_receiving() {
    let broker = broker();
    let u1 = online(&broker, "u1").await;
    let view = inbox(&u1, "u1", "chat");
    assert!(u1.unregister_handler(&UserId::from("u1"), &ConsumerId::from("chat")));
    assert!(!u1.unregister_handler(&UserId::from("u1"), &ConsumerId::from("chat")));

    let m = Message::compose(MessageDraft::new("u2", "u1", "hi")).unwrap();
    let _ = broker.publish("/topic/messages/u1", &m.to_json().unwrap());
    settle().await;
    assert!(view.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delivery_resumes_transparently_after_reconnect() {
    let broker = broker();
    let u1 = online(&broker, "u1").await;
    let view = inbox(&u1, "u1", "chat");

    let before = Message::compose(MessageDraft::new("u2", "u1", "before")).unwrap();
    let _ = broker.publish("/topic/messages/u1", &before.to_json().unwrap());
    settle().await;

    broker.drop_connections();
    settle().await;
    assert_eq!(u1.state(), GatewayState::Reconnecting);
    assert_matches!(u1.send(MessageDraft::new("u1", "u2", "gap")), Err(SendError::Offline));

    tokio::time::sleep(Duration::from_millis(5100)).await;
    settle().await;
    assert_eq!(u1.state(), GatewayState::Online);

    // A replay of a message seen before the drop stays suppressed.
    let _ = broker.publish("/topic/messages/u1", &before.to_json().unwrap());
    let after = Message::compose(MessageDraft::new("u2", "u1", "after")).unwrap();
    let _ = broker.publish("/topic/messages/u1", &after.to_json().unwrap());
    settle().await;

    assert_eq!(*view.lock(), vec![before, after]);
}

#[tokio::test(start_paused = true)]
async fn offline_send_touches_nothing() {
    let broker = broker();
    broker.set_available(false);
    let u1 = gateway(&broker);
    let err = u1
        .connect(UserId::from("u1"), Credentials::anonymous())
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(u1.state(), GatewayState::Offline);

    let result = u1.send(MessageDraft::new("u1", "u2", "hello"));
    assert_matches!(result, Err(SendError::Offline));
    assert_eq!(result.unwrap_err().to_string(), "message sending is currently unavailable");
    assert!(broker.published().is_empty());

    // Comes online once the broker is back.
    broker.set_available(true);
    tokio::time::sleep(Duration::from_millis(5100)).await;
    settle().await;
    assert_eq!(u1.state(), GatewayState::Online);
    assert!(u1.send(MessageDraft::new("u1", "u2", "hello")).is_ok());
}

#[tokio::test(start_paused = true)]
async fn lifecycle_calls_are_idempotent() {
    let broker = broker();
    let u1 = online(&broker, "u1").await;

    u1.connect(UserId::from("u1"), Credentials::anonymous()).await.unwrap();
    assert_eq!(broker.connect_attempts(), 1);

    let other = u1
        .connect(UserId::from("u9"), Credentials::anonymous())
        .await
        .unwrap_err();
    assert!(!other.is_recoverable());
    assert_eq!(u1.user(), Some(UserId::from("u1")));

    u1.disconnect();
    u1.disconnect();
    settle().await;
    assert_eq!(u1.state(), GatewayState::Idle);
    assert_eq!(broker.connection_count(), 0);

    u1.connect(UserId::from("u9"), Credentials::anonymous()).await.unwrap();
    assert_eq!(u1.user(), Some(UserId::from("u9")));
}

#[tokio::test(start_paused = true)]
async fn conversation_view_dedups_optimistic_send_and_orders() {
    let broker = broker();
    let u1 = online(&broker, "u1").await;
    let u2 = online(&broker, "u2").await;
    let inbound = inbox(&u1, "u1", "chat-u2");

    let mut view = Conversation::new(UserId::from("u1"), UserId::from("u2"));
    let mine = u1.send(MessageDraft::new("u1", "u2", "hello")).unwrap();
    assert_eq!(view.push_local(mine.clone()), Acceptance::Accepted);
    let reply = u2.send(MessageDraft::new("u2", "u1", "hi back")).unwrap();
    settle().await;

    for message in inbound.lock().drain(..) {
        let _ = view.accept(message);
    }
    let ids: Vec<_> = view.messages().iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, vec![mine.id, reply.id]);
}
