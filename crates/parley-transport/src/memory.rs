//! In-process broker for tests and offline development.
//!
//! [`MemoryBroker`] implements [`Connector`] without any I/O. Every `Send`
//! is delivered to every connection subscribed to the exact destination,
//! the sender included. With an app relay configured it also plays the
//! backend's role for the persistence destination: a message published
//! there is re-published to the personal topics of both participants.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{Message, TopicNames, UserId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connector::{ConnectRequest, Connector, LINK_BUFFER, Link};
use crate::error::{Result, TransportError};
use crate::frame::{ClientFrame, LinkEvent, ServerFrame};
use crate::heartbeat::HeartbeatTimings;

/// A payload the broker routed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    /// Destination it was published to.
    pub destination: String,
    /// Payload.
    pub body: String,
}

struct Connection {
    user_id: UserId,
    subscriptions: HashMap<String, String>,
    inbound: mpsc::Sender<LinkEvent>,
}

struct BrokerState {
    available: bool,
    timings: HeartbeatTimings,
    relay: Option<TopicNames>,
    connections: HashMap<u64, Connection>,
    next_connection: u64,
    published: Vec<Published>,
    attempts: u32,
}

/// Shared handle to an in-memory broker. Clones see the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// An available broker without heartbeats or relay.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                available: true,
                timings: HeartbeatTimings::default(),
                relay: None,
                connections: HashMap::new(),
                next_connection: 0,
                published: Vec::new(),
                attempts: 0,
            })),
        }
    }

    /// Re-publish messages sent to `topics.app_destination` onto both
    /// participants' personal topics.
    #[must_use]
    pub fn with_app_relay(self, topics: TopicNames) -> Self {
        self.state.lock().relay = Some(topics);
        self
    }

    /// Hand these heartbeat timings to every new link. The broker itself
    /// never sends heartbeats, so a non-zero `expect_every` lets tests
    /// exercise liveness timeouts.
    #[must_use]
    pub fn with_heartbeat(self, timings: HeartbeatTimings) -> Self {
        self.state.lock().timings = timings;
        self
    }

    /// Accept or refuse new connections.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Sever every open connection as if the network went away.
    pub fn drop_connections(&self) {
        let dropped: Vec<Connection> = self.state.lock().connections.drain().map(|(_, c)| c).collect();
        debug!(count = dropped.len(), "memory broker dropping connections");
        for conn in dropped {
            let _ = conn.inbound.try_send(LinkEvent::Closed {
                reason: "dropped by broker".into(),
            });
        }
    }

    /// Publish from the broker side. Returns how many subscriptions received it.
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        route(&self.state, destination, body)
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Connection attempts seen so far, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Everything routed so far, in order.
    pub fn published(&self) -> Vec<Published> {
        self.state.lock().published.clone()
    }

    /// Payloads routed to `destination`, in order.
    pub fn published_to(&self, destination: &str) -> Vec<String> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|p| p.destination == destination)
            .map(|p| p.body.clone())
            .collect()
    }

    /// Destinations `user` is subscribed to across its connections, sorted.
    pub fn subscriptions_of(&self, user: &UserId) -> Vec<String> {
        let state = self.state.lock();
        let mut topics: Vec<String> = state
            .connections
            .values()
            .filter(|c| &c.user_id == user)
            .flat_map(|c| c.subscriptions.values().cloned())
            .collect();
        topics.sort();
        topics
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn open(&self, request: &ConnectRequest) -> Result<Link> {
        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);

        let (id, timings) = {
            let mut state = self.state.lock();
            state.attempts += 1;
            if !state.available {
                return Err(TransportError::Handshake {
                    reason: "broker unavailable".into(),
                });
            }
            let id = state.next_connection;
            state.next_connection += 1;
            let _ = state.connections.insert(
                id,
                Connection {
                    user_id: request.user_id.clone(),
                    subscriptions: HashMap::new(),
                    inbound: in_tx,
                },
            );
            (id, state.timings)
        };
        debug!(connection = id, user = %request.user_id, "memory broker accepted connection");

        let _serve = tokio::spawn(serve(Arc::clone(&self.state), id, out_rx));

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
            heartbeat: timings,
        })
    }
}

async fn serve(state: Arc<Mutex<BrokerState>>, id: u64, mut outbound: mpsc::Receiver<ClientFrame>) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            ClientFrame::Subscribe { id: sub, destination } => {
                if let Some(conn) = state.lock().connections.get_mut(&id) {
                    let _ = conn.subscriptions.insert(sub, destination);
                }
            }
            ClientFrame::Unsubscribe { id: sub } => {
                if let Some(conn) = state.lock().connections.get_mut(&id) {
                    let _ = conn.subscriptions.remove(&sub);
                }
            }
            ClientFrame::Send { destination, body } => {
                if !state.lock().connections.contains_key(&id) {
                    continue;
                }
                let _ = route(&state, &destination, &body);
                relay(&state, &destination, &body);
            }
            ClientFrame::Heartbeat => {}
            ClientFrame::Disconnect => break,
        }
    }
    let _ = state.lock().connections.remove(&id);
}

fn route(state: &Mutex<BrokerState>, destination: &str, body: &str) -> usize {
    let targets: Vec<(mpsc::Sender<LinkEvent>, String)> = {
        let mut state = state.lock();
        state.published.push(Published {
            destination: destination.to_string(),
            body: body.to_string(),
        });
        state
            .connections
            .values()
            .flat_map(|conn| {
                conn.subscriptions
                    .iter()
                    .filter(|(_, dest)| dest.as_str() == destination)
                    .map(|(sub, _)| (conn.inbound.clone(), sub.clone()))
            })
            .collect()
    };

    let mut delivered = 0;
    for (inbound, subscription) in targets {
        let frame = ServerFrame::Message {
            subscription,
            destination: destination.to_string(),
            body: body.to_string(),
        };
        if inbound.try_send(LinkEvent::Frame(frame)).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

fn relay(state: &Mutex<BrokerState>, destination: &str, body: &str) {
    let Some(topics) = state.lock().relay.clone() else {
        return;
    };
    if destination != topics.app_destination {
        return;
    }
    match Message::from_json(body) {
        Ok(message) => {
            let _ = route(state, &topics.personal(&message.to), body);
            let _ = route(state, &topics.personal(&message.from), body);
        }
        Err(e) => warn!(error = %e, "memory broker relay ignoring malformed message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Credentials;
    use crate::heartbeat::HeartbeatConfig;

    fn request(user: &str) -> ConnectRequest {
        ConnectRequest {
            user_id: UserId::from(user),
            credentials: Credentials::anonymous(),
            heartbeat: HeartbeatConfig::DISABLED,
        }
    }

    async fn next_body(link: &mut Link) -> String {
        match link.inbound.recv().await {
            Some(LinkEvent::Frame(ServerFrame::Message { body, .. })) => body,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivers_to_subscribers_including_sender() {
        let broker = MemoryBroker::new();
        let mut a = broker.open(&request("a")).await.unwrap();
        let mut b = broker.open(&request("b")).await.unwrap();
        for link in [&a, &b] {
            link.outbound
                .send(ClientFrame::Subscribe {
                    id: "sub-0".into(),
                    destination: "/topic/x".into(),
                })
                .await
                .unwrap();
        }
        while broker.subscriptions_of(&UserId::from("a")).is_empty()
            || broker.subscriptions_of(&UserId::from("b")).is_empty()
        {
            tokio::task::yield_now().await;
        }
        a.outbound
            .send(ClientFrame::Send {
                destination: "/topic/x".into(),
                body: "hi".into(),
            })
            .await
            .unwrap();

        assert_eq!(next_body(&mut a).await, "hi");
        assert_eq!(next_body(&mut b).await, "hi");
        assert_eq!(broker.published_to("/topic/x"), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn unavailable_broker_refuses_and_counts_attempts() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let err = broker.open(&request("a")).await.unwrap_err();
        assert!(matches!(err, TransportError::Handshake { .. }));
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn drop_connections_notifies_links() {
        let broker = MemoryBroker::new();
        let mut link = broker.open(&request("a")).await.unwrap();
        assert_eq!(broker.connection_count(), 1);
        broker.drop_connections();
        assert_eq!(broker.connection_count(), 0);
        assert!(matches!(link.inbound.recv().await, Some(LinkEvent::Closed { .. })));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_recorded() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.publish("/topic/none", "x"), 0);
        assert_eq!(broker.published().len(), 1);
    }
}
