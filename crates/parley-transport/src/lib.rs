//! # parley-transport
//!
//! One persistent publish/subscribe connection to the message broker.
//!
//! - **Session**: [`TransportSession`] with connect/disconnect, publish,
//!   subscribe, and supervised reconnect
//! - **Connectors**: the [`Connector`] seam, a STOMP-over-WebSocket
//!   implementation and an in-memory broker for tests
//! - **Heartbeats**: negotiation and liveness tracking

#![deny(unsafe_code)]

pub mod connector;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod memory;
pub mod session;
pub mod stomp;
mod supervisor;
pub mod websocket;

pub use connector::{ConnectRequest, Connector, Credentials, Link};
pub use error::TransportError;
pub use frame::{ClientFrame, LinkEvent, ServerFrame};
pub use heartbeat::{HeartbeatConfig, HeartbeatTimings};
pub use memory::{MemoryBroker, Published};
pub use session::{
    ConnectionState, FrameCallback, InboundFrame, SessionConfig, SessionHandlers, SubscriptionHandle,
    TransportSession,
};
pub use websocket::WebSocketConnector;
