//! Event-driven acquisition for remote-feed mode over Socket.IO.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use std::time::Duration;
use reqwest::Url;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::socketio::{self, Packet};
use super::{ConnectionState, FeedEvent, FeedHandle, Frame};
use crate::detection::RawDetection;
use crate::error::{FeedError, FeedResult};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

// Engine.IO defaults (25 s interval + 20 s timeout) until the handshake says otherwise.
const DEFAULT_SILENCE_LIMIT: Duration = Duration::from_millis(45_000);

/// Websocket URL of the Socket.IO endpoint for a session
///
/// The session id is query-encoded.
///
/// # Errors
/// * Returns `Protocol` if `base_url` is not a valid URL
pub fn socket_url(base_url: &str, session_id: &str) -> FeedResult<String> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };

    let mut url = Url::parse(&format!("{}/socket.io/", ws_base.trim_end_matches('/')))
        .map_err(|e| FeedError::Protocol(format!("bad server url {}: {}", base_url, e)))?;
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket")
        .append_pair("cart_id", session_id);
    Ok(url.into())
}

fn event_message(data: &Value) -> String {
    match data {
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn handle_event(shared: &FeedHandle, name: &str, data: Value) {
    match name {
        "connection_success" => info!("Connection success: {}", data),
        "frame" | "esp32_frame" | "frame_update" => {
            let Some(image) = data.get("image").and_then(Value::as_str) else {
                debug!("Frame event without image");
                return;
            };
            match STANDARD.decode(image) {
                Ok(bytes) if !bytes.is_empty() => shared.show_frame(Frame::new(bytes, "image/jpeg")),
                Ok(_) => debug!("Empty frame event"),
                Err(e) => debug!("Frame event with bad base64: {}", e),
            }
        }
        "detection" | "detection_result" => {
            let raw: RawDetection = match serde_json::from_value(data) {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("Ignoring detection event: {}", e);
                    return;
                }
            };
            if raw.session() == Some(shared.session_id()) {
                shared.handle_detection(raw);
            } else {
                debug!("Detection for another session: {:?}", raw.session());
            }
        }
        "error" => {
            let message = event_message(&data);
            warn!("Server error: {}", message);
            shared.emit(FeedEvent::Error(format!("Server error: {}", message)));
        }
        other => debug!("Unhandled event {}", other),
    }
}

// One connection, from handshake to close. `connected` is set once the
// namespace is joined so the caller can reset its retry budget.
async fn session(shared: &FeedHandle, url: &str, connected: &mut bool) -> FeedResult<()> {
    let (mut ws, _) = connect_async(url).await?;
    let mut silence_limit = DEFAULT_SILENCE_LIMIT;

    loop {
        // A live server pings within its interval; anything longer is a dead link.
        let message = match tokio::time::timeout(silence_limit, ws.next()).await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(_) => {
                return Err(FeedError::NetworkUnavailable(format!(
                    "no packet from server for {} ms",
                    silence_limit.as_millis()
                )));
            }
        };

        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => return Ok(()),
            _ => continue,
        };

        let packet = match socketio::decode(&text) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Skipping packet: {}", e);
                continue;
            }
        };

        match packet {
            Packet::Open(handshake) => {
                debug!("Engine.IO session {}", handshake.sid);
                if let Some(limit) = handshake.silence_limit() {
                    silence_limit = limit;
                }
                ws.send(Message::Text(socketio::CONNECT.to_string())).await?;
            }
            Packet::Ping => ws.send(Message::Text(socketio::PONG.to_string())).await?,
            Packet::Connect(_) => {
                *connected = true;
                info!("Connected to server");
                shared.set_state(ConnectionState::Connected);
            }
            Packet::ConnectError(message) => return Err(FeedError::Protocol(message)),
            Packet::Disconnect | Packet::Close => return Ok(()),
            Packet::Event { name, data } => handle_event(shared, &name, data),
            Packet::Pong | Packet::Noop => {}
        }
    }
}

/// Keep a Socket.IO session open, reconnecting with backoff
///
/// Gives up after `attempts` consecutive failed connections; a session that
/// reached the connected state resets the count.
pub(crate) async fn run(shared: FeedHandle, base_url: String, attempts: u32) {
    let url = match socket_url(&base_url, shared.session_id()) {
        Ok(url) => url,
        Err(e) => {
            warn!("Cannot open camera feed: {}", e);
            shared.emit(FeedEvent::Error(e.to_string()));
            shared.set_state(ConnectionState::Disconnected);
            return;
        }
    };
    let mut failures = 0u32;
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        shared.set_state(ConnectionState::Connecting);
        let mut connected = false;

        match session(&shared, &url, &mut connected).await {
            Ok(()) => info!("Disconnected from server"),
            Err(e) => {
                warn!("Connection error: {}", e);
                shared.emit(FeedEvent::Error(format!("Connection error: {}", e)));
            }
        }
        shared.set_state(ConnectionState::Disconnected);

        if connected {
            failures = 0;
            delay = INITIAL_RECONNECT_DELAY;
        }
        failures += 1;
        if failures > attempts {
            warn!("Giving up on camera feed after {} attempts", attempts);
            return;
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }
}
