//! JSON frame types exchanged over the WebSocket adapter (C14), per the
//! project spec's frame-type table: `subscribe`, `unsubscribe`, `request`,
//! and `heartbeat` inbound; `welcome`, `response`, `heartbeat_ack`, and
//! `broadcast` outbound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::MessageEnvelope;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        token: String,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    Request {
        id: String,
        message_type: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Heartbeat {},
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome {
        client_id: Uuid,
        server: String,
        version: String,
    },
    Subscribed {
        topic: String,
    },
    Unsubscribed {
        topic: String,
    },
    Response {
        id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    HeartbeatAck {
        timestamp: DateTime<Utc>,
    },
    Broadcast {
        topic: String,
        envelope: MessageEnvelope,
    },
    Error {
        detail: String,
    },
}

impl ServerFrame {
    /// Serializes to a text frame. Never fails in practice (every variant is
    /// plain JSON-serializable data); falls back to an empty object so a
    /// serialization bug can't panic the connection task.
    pub fn to_message(&self) -> axum::extract::ws::Message {
        let text = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        axum::extract::ws::Message::Text(text.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_tags_are_snake_case() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Heartbeat {}));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"subscribe","topic":"logs/**"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Subscribe { topic } if topic == "logs/**"));
    }

    #[test]
    fn request_frame_defaults_payload_when_absent() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"request","id":"1","message_type":"api/echo"}"#).unwrap();
        match frame {
            ClientFrame::Request { payload, .. } => assert!(payload.is_null()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn response_frame_omits_absent_fields() {
        let frame = ServerFrame::Response {
            id: "1".to_string(),
            success: false,
            correlation_id: None,
            data: None,
            error: Some("no route".to_string()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("correlation_id"));
        assert!(!json.contains("\"data\""));
        assert!(json.contains("no route"));
    }
}
