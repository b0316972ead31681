//! # parley-gateway
//!
//! Message delivery for chat views on top of a [`parley_transport::TransportSession`].
//!
//! - **Registry**: per-user, per-consumer callbacks with panic-isolated fan-out
//! - **Dedup**: at-most-once delivery per registration
//! - **Router**: personal and global topic subscriptions, parsing, filtering
//! - **Gateway**: connect, send, and handler registration
//! - **Conversation**: ordered transcript with optimistic local sends

#![deny(unsafe_code)]

pub mod conversation;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod router;

pub use conversation::{Acceptance, Conversation};
pub use dedup::DeliveryTracker;
pub use error::SendError;
pub use gateway::{GatewayConfig, GatewayState, MessageGateway};
pub use registry::{DispatchReport, HandlerRegistry, MessageCallback};
pub use router::{RouteOutcome, TopicRouter};
