#![forbid(unsafe_code)]

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Envelope for events exchanged between the producer and consumer services.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub kind: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: JsonValue,
}

impl DomainEvent {
    pub fn new(kind: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug)]
pub struct ParsedPayload {
    pub base64: String,
    pub text: Option<String>,
    pub json: Option<JsonValue>,
}

/// Classifies an opaque delivery body for logging and handler decoding.
/// Non-UTF8 bodies are still representable via the base64 form.
pub fn parse_payload(bytes: &[u8]) -> ParsedPayload {
    let base64 = BASE64_STANDARD.encode(bytes);

    let mut text = None;
    let mut json_value = None;

    if let Ok(str_value) = std::str::from_utf8(bytes) {
        text = Some(str_value.to_string());
        if let Ok(parsed) = serde_json::from_str::<JsonValue>(str_value) {
            json_value = Some(parsed);
        }
    }

    ParsedPayload {
        base64,
        text,
        json: json_value,
    }
}
