//! Minimal Socket.IO v5 / Engine.IO v4 text packet codec.
//!
//! Only what a websocket-transport client needs: the open handshake,
//! heartbeats, namespace connect/disconnect and plain events. Binary
//! attachments are not supported.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::FeedError;

/// Sent after the Engine.IO handshake to join the default namespace
pub const CONNECT: &str = "40";

/// Reply to an Engine.IO ping
pub const PONG: &str = "3";

/// Engine.IO open handshake
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

impl Handshake {
    /// Longest silence tolerated from the server: one ping interval plus its timeout
    pub fn silence_limit(&self) -> Option<Duration> {
        match self.ping_interval + self.ping_timeout {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace joined
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(String),
}

/// Decode one websocket text frame
///
/// # Errors
/// * Returns `Protocol` for empty frames, unknown packet types, binary
///   events and event payloads that are not `["name", ...]` arrays
pub fn decode(text: &str) -> Result<Packet, FeedError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| FeedError::Protocol("empty packet".to_string()))?;
    let rest = chars.as_str();

    match kind {
        '0' => {
            let handshake: Handshake = serde_json::from_str(rest)
                .map_err(|e| FeedError::Protocol(format!("bad handshake: {}", e)))?;
            Ok(Packet::Open(handshake))
        }
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_message(rest),
        '6' => Ok(Packet::Noop),
        other => Err(FeedError::Protocol(format!("unknown packet type {:?}", other))),
    }
}

fn decode_message(text: &str) -> Result<Packet, FeedError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| FeedError::Protocol("empty message".to_string()))?;
    let body = skip_namespace_and_ack(chars.as_str());

    match kind {
        '0' => {
            if body.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(parse_json(body)?)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(body),
        '4' => {
            let message = match parse_json(body)? {
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("connection refused")
                    .to_string(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(Packet::ConnectError(message))
        }
        '5' | '6' => Err(FeedError::Protocol("binary packets are not supported".to_string())),
        other => Err(FeedError::Protocol(format!("unknown message type {:?}", other))),
    }
}

// Strips an optional "/namespace," prefix and numeric ack id.
fn skip_namespace_and_ack(body: &str) -> &str {
    let body = if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    };
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_json(body: &str) -> Result<Value, FeedError> {
    serde_json::from_str(body).map_err(|e| FeedError::Protocol(format!("bad payload: {}", e)))
}

fn decode_event(body: &str) -> Result<Packet, FeedError> {
    let Value::Array(mut items) = parse_json(body)? else {
        return Err(FeedError::Protocol("event payload is not an array".to_string()));
    };
    if items.is_empty() {
        return Err(FeedError::Protocol("event without a name".to_string()));
    }

    let name = match items.remove(0) {
        Value::String(name) => name,
        other => return Err(FeedError::Protocol(format!("event name is not a string: {}", other))),
    };
    let data = if items.is_empty() {
        Value::Null
    } else {
        items.remove(0)
    };

    Ok(Packet::Event { name, data })
}

/// Encode an event for sending
pub fn encode_event(name: &str, data: &Value) -> String {
    format!("42{}", Value::Array(vec![Value::String(name.to_string()), data.clone()]))
}
