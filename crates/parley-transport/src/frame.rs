//! Broker-level frames exchanged over a [`Link`](crate::connector::Link).
//!
//! These are protocol-neutral: the WebSocket connector maps them onto STOMP,
//! the in-memory broker consumes them directly.

/// Frame sent by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    /// Start receiving messages published to `destination`.
    Subscribe {
        /// Client-chosen subscription id, echoed back on every message.
        id: String,
        /// Topic to subscribe to.
        destination: String,
    },
    /// Stop a subscription.
    Unsubscribe {
        /// Subscription id.
        id: String,
    },
    /// Publish a payload.
    Send {
        /// Target destination.
        destination: String,
        /// JSON payload.
        body: String,
    },
    /// Keep-alive.
    Heartbeat,
    /// Graceful goodbye.
    Disconnect,
}

/// Frame received from the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerFrame {
    /// A message published on a subscribed destination.
    Message {
        /// Subscription id the message was delivered for.
        subscription: String,
        /// Destination it was published to.
        destination: String,
        /// Payload.
        body: String,
    },
    /// Broker-side error; the broker closes the connection afterwards.
    Error {
        /// Short description.
        message: String,
        /// Details, possibly empty.
        body: String,
    },
    /// Acknowledgement of a frame that requested a receipt.
    Receipt {
        /// Receipt id.
        id: String,
    },
    /// Keep-alive.
    Heartbeat,
}

/// What a link reports to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// A decoded frame.
    Frame(ServerFrame),
    /// The underlying connection is gone.
    Closed {
        /// Close reason, if known.
        reason: String,
    },
}
