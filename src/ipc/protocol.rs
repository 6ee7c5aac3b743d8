//! Request/response shape for the local IPC adapter (C15). Reuses the bus's
//! two-part length-delimited framing (see [`crate::bus::wire`]) rather than
//! inventing a second wire format: frame 1 carries the request's
//! `message_type` as the "topic", frame 2 carries a [`MessageEnvelope`] whose
//! payload is the request body. The reply is written back over the same
//! connection using the same framing, topic `"response"`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::envelope::MessageEnvelope;

pub const RESPONSE_TOPIC: &str = "response";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    pub fn ok(correlation_id: Uuid, data: serde_json::Value) -> Self {
        Self { success: true, correlation_id: Some(correlation_id), data: Some(data), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, correlation_id: None, data: None, error: Some(message.into()) }
    }

    pub fn into_envelope(self) -> MessageEnvelope {
        let payload = serde_json::to_value(&self).unwrap_or(serde_json::Value::Null);
        MessageEnvelope::new("local-ipc", RESPONSE_TOPIC, payload)
    }
}
