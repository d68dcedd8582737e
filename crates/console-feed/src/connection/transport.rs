//! Event source transports.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::{debug, info, warn};

use crate::{
    error::{FeedError, FeedResult},
    session::Session,
};

/// Room joined when the session carries no role.
pub const DEFAULT_ROOM: &str = "console";

/// One inbound frame: `{"event": <channel>, "data": <payload>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Frames of an established connection. Ends when the server closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = FeedResult<InboundFrame>> + Send>>;

/// Opens authenticated connections to the event source.
#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    /// Connect and complete the handshake for `session`.
    ///
    /// Returns once the server has acknowledged the join; the caller bounds
    /// the whole call with the handshake timeout.
    async fn connect(&self, session: &Session) -> FeedResult<FrameStream>;
}

/// Room scoped to the session's role.
pub fn room_for(session: &Session) -> &str {
    session.role().map_or(DEFAULT_ROOM, |role| role.as_str())
}

fn parse_frame(text: &str) -> Option<InboundFrame> {
    match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(error = %err, "Dropping malformed frame");
            None
        }
    }
}

fn error_message(data: &serde_json::Value) -> String {
    data.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| data.as_str())
        .unwrap_or("join rejected")
        .to_string()
}

/// WebSocket transport.
///
/// Connects with `Authorization: Bearer <token>`, sends
/// `{"event":"join","data":{"room":<role>}}` and waits for `joined` (or
/// `error`).
#[derive(Clone, Debug)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventTransport for WsTransport {
    async fn connect(&self, session: &Session) -> FeedResult<FrameStream> {
        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", session.token()))
            .map_err(|e| FeedError::connection(format!("Invalid token header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _response) = connect_async(request).await?;
        let (mut write, mut read) = ws.split();

        let room = room_for(session);
        let join = json!({ "event": "join", "data": { "room": room } });
        write.send(Message::text(join.to_string())).await?;
        debug!(room, "Join sent");

        loop {
            let message = read
                .next()
                .await
                .ok_or_else(|| FeedError::connection("Connection closed during handshake"))??;
            let text = match &message {
                Message::Text(text) => text.as_str(),
                Message::Close(_) => {
                    return Err(FeedError::connection("Connection closed during handshake"));
                }
                _ => continue,
            };
            let Some(frame) = parse_frame(text) else {
                continue;
            };
            match frame.event.as_str() {
                "joined" => break,
                "error" => {
                    return Err(FeedError::connection(format!(
                        "Join rejected: {}",
                        error_message(&frame.data)
                    )));
                }
                other => debug!(event = other, "Ignoring frame before join acknowledgment"),
            }
        }
        info!(room, "Joined event room");

        // The write half rides along so the connection stays open for as
        // long as the stream is alive.
        let frames = stream::unfold((read, write), |(mut read, write)| async move {
            loop {
                let item = match read.next().await? {
                    Ok(Message::Text(text)) => parse_frame(text.as_str()).map(Ok),
                    Ok(Message::Binary(bytes)) => std::str::from_utf8(&bytes)
                        .ok()
                        .and_then(parse_frame)
                        .map(Ok),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Server closed connection");
                        return None;
                    }
                    Ok(_) => None,
                    Err(err) => Some(Err(FeedError::from(err))),
                };
                if let Some(item) = item {
                    return Some((item, (read, write)));
                }
            }
        });

        Ok(Box::pin(frames))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::session::encode_unsigned;

    fn session(role: Option<&str>) -> Session {
        let mut claims = json!({ "exp": Utc::now().timestamp() + 600 });
        if let Some(role) = role {
            claims["role"] = json!(role);
        }
        Session::from_token(encode_unsigned(&claims), None).expect("session")
    }

    #[test]
    fn test_room_follows_role() {
        assert_eq!(room_for(&session(Some("super_admin"))), "super_admin");
        assert_eq!(room_for(&session(Some("dispatcher"))), "dispatcher");
        assert_eq!(room_for(&session(None)), DEFAULT_ROOM);
    }

    #[test]
    fn test_parse_frame() {
        let frame = parse_frame(r#"{"event":"payment_received","data":{"amount":5}}"#)
            .expect("frame");
        assert_eq!(frame.event, "payment_received");
        assert_eq!(frame.data, json!({"amount": 5}));

        let bare = parse_frame(r#"{"event":"joined"}"#).expect("frame");
        assert!(bare.data.is_null());

        assert!(parse_frame("not json").is_none());
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(&json!({"message": "forbidden"})), "forbidden");
        assert_eq!(error_message(&json!("nope")), "nope");
        assert_eq!(error_message(&json!(null)), "join rejected");
    }
}
