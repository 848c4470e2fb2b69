//! JSON wire protocol
//!
//! Every frame is a JSON object with a `type` tag. The backend streams a reply
//! as `start`, any number of `token` frames, then a terminal `end` (also sent
//! as `done` or `turn_end`). One-shot replies arrive as `full_message` or
//! `error`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::Message;

/// Frames received from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A streamed bot reply begins
    Start {
        #[serde(
            default,
            deserialize_with = "lenient_id",
            skip_serializing_if = "Option::is_none"
        )]
        message_id: Option<String>,
    },
    /// A fragment of the streamed reply
    Token {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },
    /// The streamed reply is complete
    #[serde(alias = "done", alias = "turn_end")]
    End,
    /// A complete reply delivered in one frame
    FullMessage {
        #[serde(
            default,
            deserialize_with = "lenient_id",
            skip_serializing_if = "Option::is_none"
        )]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
    /// The backend reports a failure
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(
            default,
            deserialize_with = "lenient_id",
            skip_serializing_if = "Option::is_none"
        )]
        id: Option<String>,
    },
    /// Any `type` this client does not understand
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Decode a text payload
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Decode a binary payload holding UTF-8 JSON
    pub fn decode_bytes(raw: &[u8]) -> Result<Self> {
        Self::decode(std::str::from_utf8(raw)?)
    }

    /// Canonical kind name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Start { .. } => "start",
            InboundFrame::Token { .. } => "token",
            InboundFrame::End => "end",
            InboundFrame::FullMessage { .. } => "full_message",
            InboundFrame::Error { .. } => "error",
            InboundFrame::Unknown => "unknown",
        }
    }

    /// Check if this frame closes a streamed reply
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboundFrame::End)
    }
}

/// Frames sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// A user message
    Message {
        content: String,
        #[serde(with = "iso_millis")]
        timestamp: DateTime<Utc>,
    },
}

impl OutboundFrame {
    /// Build the frame carrying a local message
    pub fn message(message: &Message) -> Self {
        OutboundFrame::Message {
            content: message.content.clone(),
            timestamp: message.timestamp,
        }
    }

    /// Encode to a JSON text frame
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Interpret a `full_message` timestamp: ISO-8601 text or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Render a `full_message` frame's content as display text.
///
/// Non-string content is kept as its JSON text; absent content is empty.
pub fn content_text(content: Option<&Value>) -> String {
    value_text(content).unwrap_or_default()
}

/// Render an `error` frame's content as display text.
pub fn error_text(content: Option<&Value>) -> String {
    let detail = value_text(content).unwrap_or_else(|| "unknown error".to_string());
    format!("Error: {}", detail)
}

fn value_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Accept identifiers sent as strings or numbers. Empty strings count as absent.
fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Format an instant the way outbound frames carry it
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
