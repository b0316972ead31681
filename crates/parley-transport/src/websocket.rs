//! STOMP-over-WebSocket connector built on `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::connector::{ConnectRequest, Connector, LINK_BUFFER, Link};
use crate::error::{Result, TransportError};
use crate::frame::{ClientFrame, LinkEvent, ServerFrame};
use crate::heartbeat::negotiate;
use crate::stomp::{self, Decoded, StompFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a STOMP broker endpoint over WebSocket.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Connector for a `ws://` or `wss://` endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Link> {
        let mut ws_request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| handshake(format!("invalid broker url {}: {e}", self.url)))?;

        if let Some(token) = request.credentials.token() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| handshake(format!("invalid credential: {e}")))?;
            let _ = ws_request.headers_mut().insert(AUTHORIZATION, value);
        }
        let host = ws_request.uri().host().unwrap_or("localhost").to_string();

        let (mut ws, _) = connect_async(ws_request)
            .await
            .map_err(|e| handshake(format!("WebSocket connect: {e}")))?;

        let connect = stomp::connect_frame(
            &host,
            request.user_id.as_str(),
            request.credentials.token(),
            request.heartbeat.as_header(),
        );
        ws.send(Message::Text(connect.encode().into()))
            .await
            .map_err(|e| handshake(format!("send CONNECT: {e}")))?;

        let connected = await_connected(&mut ws).await?;
        let heartbeat = negotiate(request.heartbeat, connected.get("heart-beat"));
        info!(
            url = %self.url,
            user = %request.user_id,
            version = connected.get("version").unwrap_or("?"),
            ?heartbeat,
            "STOMP session established"
        );

        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);
        let _pump = tokio::spawn(pump(ws, out_rx, in_tx));

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
            heartbeat,
        })
    }
}

fn handshake(reason: String) -> TransportError {
    TransportError::Handshake { reason }
}

/// Read until the broker answers CONNECT.
async fn await_connected(ws: &mut WsStream) -> Result<StompFrame> {
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| handshake(format!("read during handshake: {e}")))?;
        let text = match msg {
            Message::Text(t) => t.as_str().to_owned(),
            Message::Binary(data) => String::from_utf8(data.to_vec())
                .map_err(|_| TransportError::Protocol("non-UTF8 handshake frame".into()))?,
            Message::Close(_) => return Err(handshake("closed during handshake".into())),
            _ => continue,
        };
        for decoded in stomp::decode(&text)? {
            match decoded {
                Decoded::Heartbeat => {}
                Decoded::Frame(frame) if frame.command == "CONNECTED" => return Ok(frame),
                Decoded::Frame(frame) if frame.command == "ERROR" => {
                    return Err(TransportError::Rejected {
                        reason: frame.get("message").unwrap_or("unspecified").to_string(),
                    });
                }
                Decoded::Frame(frame) => {
                    return Err(TransportError::Protocol(format!(
                        "expected CONNECTED, got {}",
                        frame.command
                    )));
                }
            }
        }
    }
    Err(handshake("connection ended during handshake".into()))
}

/// Shuttle frames between the socket and the link channels until either
/// side goes away, then report the close reason.
async fn pump(ws: WsStream, mut outbound: mpsc::Receiver<ClientFrame>, inbound: mpsc::Sender<LinkEvent>) {
    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let closing = frame == ClientFrame::Disconnect;
                    if let Err(e) = sink.send(Message::Text(stomp::encode_client(&frame).into())).await {
                        break format!("send failed: {e}");
                    }
                    if closing {
                        let _ = sink.close().await;
                        break "client disconnected".to_string();
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break "link released".to_string();
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => forward(text.as_str(), &inbound).await,
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => forward(text, &inbound).await,
                    Err(_) => warn!(len = data.len(), "dropping non-UTF8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by broker".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            },
        }
    };

    debug!(reason, "websocket link closed");
    let _ = inbound.send(LinkEvent::Closed { reason }).await;
}

async fn forward(text: &str, inbound: &mpsc::Sender<LinkEvent>) {
    let decoded = match stomp::decode(text) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(error = %e, "dropping malformed STOMP text");
            return;
        }
    };
    for item in decoded {
        let frame = match item {
            Decoded::Heartbeat => ServerFrame::Heartbeat,
            Decoded::Frame(frame) => match stomp::to_server_frame(frame) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable frame");
                    continue;
                }
            },
        };
        if inbound.send(LinkEvent::Frame(frame)).await.is_err() {
            return;
        }
    }
}
