//! STOMP 1.2 text framing.
//!
//! A frame is `COMMAND\nheader:value\n...\n\nbody\0`. A bare end-of-line is a
//! heartbeat. Header values are escaped (`\\`, `\n`, `\r`, `:`) in every
//! frame except CONNECT and CONNECTED.

use crate::error::{Result, TransportError};
use crate::frame::{ClientFrame, ServerFrame};

/// Protocol version requested in CONNECT.
pub const ACCEPT_VERSION: &str = "1.2";

/// A raw STOMP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StompFrame {
    /// Command, e.g. `SEND`.
    pub command: String,
    /// Headers in wire order. Repeated headers keep the first occurrence
    /// when looked up.
    pub headers: Vec<(String, String)>,
    /// Body text.
    pub body: String,
}

/// One unit decoded from a text message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// An end-of-line heartbeat.
    Heartbeat,
    /// A full frame.
    Frame(StompFrame),
}

impl StompFrame {
    /// Create a frame without headers or body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn escapes_headers(&self) -> bool {
        self.command != "CONNECT" && self.command != "CONNECTED"
    }

    /// Encode to wire text, including the NUL terminator.
    pub fn encode(&self) -> String {
        let escape = self.escapes_headers();
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Encode a client frame for the wire.
pub fn encode_client(frame: &ClientFrame) -> String {
    match frame {
        ClientFrame::Heartbeat => "\n".to_string(),
        ClientFrame::Subscribe { id, destination } => StompFrame::new("SUBSCRIBE")
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
            .encode(),
        ClientFrame::Unsubscribe { id } => StompFrame::new("UNSUBSCRIBE").header("id", id).encode(),
        ClientFrame::Send { destination, body } => StompFrame::new("SEND")
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .body(body.clone())
            .encode(),
        ClientFrame::Disconnect => StompFrame::new("DISCONNECT").encode(),
    }
}

/// Build the CONNECT frame.
///
/// `heart_beat` is `(outgoing_ms, incoming_ms)` as the client proposes it.
pub fn connect_frame(host: &str, login: &str, passcode: Option<&str>, heart_beat: (u64, u64)) -> StompFrame {
    let mut frame = StompFrame::new("CONNECT")
        .header("accept-version", ACCEPT_VERSION)
        .header("host", host)
        .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1))
        .header("login", login);
    if let Some(passcode) = passcode {
        frame = frame.header("passcode", passcode);
    }
    frame
}

/// Interpret a decoded frame as a server frame.
pub fn to_server_frame(frame: StompFrame) -> Result<ServerFrame> {
    match frame.command.as_str() {
        "MESSAGE" => {
            let destination = required(&frame, "destination")?.to_string();
            let subscription = frame.get("subscription").unwrap_or_default().to_string();
            Ok(ServerFrame::Message {
                subscription,
                destination,
                body: frame.body,
            })
        }
        "ERROR" => Ok(ServerFrame::Error {
            message: frame.get("message").unwrap_or("unspecified").to_string(),
            body: frame.body,
        }),
        "RECEIPT" => Ok(ServerFrame::Receipt {
            id: required(&frame, "receipt-id")?.to_string(),
        }),
        other => Err(TransportError::Protocol(format!(
            "unexpected server command {other}"
        ))),
    }
}

fn required<'a>(frame: &'a StompFrame, name: &str) -> Result<&'a str> {
    frame.get(name).ok_or_else(|| {
        TransportError::Protocol(format!("{} frame without {name} header", frame.command))
    })
}

/// Decode every frame in one text message.
pub fn decode(text: &str) -> Result<Vec<Decoded>> {
    let mut out = Vec::new();
    let mut rest = text;
    loop {
        let trimmed = rest.trim_start_matches(['\r', '\n']);
        if trimmed.len() != rest.len() && !out.contains(&Decoded::Heartbeat) {
            out.push(Decoded::Heartbeat);
        }
        rest = trimmed;
        if rest.is_empty() {
            break;
        }
        let (frame, remaining) = decode_one(rest)?;
        out.push(Decoded::Frame(frame));
        rest = remaining;
    }
    // A heartbeat EOL after a real frame is just frame padding.
    if out.iter().any(|d| matches!(d, Decoded::Frame(_))) {
        out.retain(|d| matches!(d, Decoded::Frame(_)));
    }
    Ok(out)
}

fn decode_one(input: &str) -> Result<(StompFrame, &str)> {
    let (command, mut rest) = split_line(input)
        .ok_or_else(|| TransportError::Protocol("frame without command line".into()))?;
    if command.is_empty() {
        return Err(TransportError::Protocol("empty command".into()));
    }
    let escaped = command != "CONNECT" && command != "CONNECTED";

    let mut headers = Vec::new();
    loop {
        let (line, remaining) = split_line(rest)
            .ok_or_else(|| TransportError::Protocol("unterminated header block".into()))?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TransportError::Protocol(format!("malformed header line {line:?}")))?;
        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut frame = StompFrame {
        command: command.to_string(),
        headers,
        body: String::new(),
    };

    let (body, after) = match frame.get("content-length") {
        Some(len) => {
            let len: usize = len
                .trim()
                .parse()
                .map_err(|_| TransportError::Protocol(format!("bad content-length {len:?}")))?;
            let body = rest
                .get(..len)
                .ok_or_else(|| TransportError::Protocol("body shorter than content-length".into()))?;
            let after = rest[len..]
                .strip_prefix('\0')
                .ok_or_else(|| TransportError::Protocol("missing NUL after body".into()))?;
            (body, after)
        }
        None => {
            let end = rest
                .find('\0')
                .ok_or_else(|| TransportError::Protocol("unterminated frame".into()))?;
            (&rest[..end], &rest[end + 1..])
        }
    };
    frame.body = body.to_string();
    Ok((frame, after))
}

/// Split off one line, accepting `\n` or `\r\n`.
fn split_line(input: &str) -> Option<(&str, &str)> {
    let idx = input.find('\n')?;
    let line = input[..idx].strip_suffix('\r').unwrap_or(&input[..idx]);
    Some((line, &input[idx + 1..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(TransportError::Protocol(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
