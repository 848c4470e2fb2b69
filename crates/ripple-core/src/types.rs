//! Core types for chat sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Typed locally and sent to the backend
    User,
    /// Produced by the remote backend
    Bot,
}

impl Role {
    /// Get the wire name of this role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }
}

/// A single entry in the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier, unique within the timeline and never reassigned
    pub id: String,
    /// Text content
    pub content: String,
    /// Author
    pub sender: Role,
    /// Creation instant
    pub timestamp: DateTime<Utc>,
    /// Whether this is a bot reply still receiving token deltas
    #[serde(default)]
    pub streaming: bool,
}

impl Message {
    /// Create a user message with a fresh identifier
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            content: content.into(),
            sender: Role::User,
            timestamp: Utc::now(),
            streaming: false,
        }
    }

    /// Create a complete bot message
    pub fn bot(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            sender: Role::Bot,
            timestamp: Utc::now(),
            streaming: false,
        }
    }

    /// Create an empty bot message that token deltas will be appended to
    pub fn bot_streaming(id: impl Into<String>) -> Self {
        Self {
            streaming: true,
            ..Self::bot(id, String::new())
        }
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check if this message was sent by the bot
    pub fn is_bot(&self) -> bool {
        self.sender == Role::Bot
    }

    /// Check if this message is a bot reply that is still open for deltas
    pub fn is_open_stream(&self) -> bool {
        self.is_bot() && self.streaming
    }
}

/// Generate a fresh message identifier
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle state of the connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No channel, and no open attempt in flight
    #[default]
    Disconnected,
    /// An open attempt is in flight
    Connecting,
    /// The channel is open and usable for sending
    Connected,
    /// The channel reported an error; a close is expected to follow
    Error,
}

impl ConnectionState {
    /// Human-readable status text
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Error => "Connection Error",
        }
    }

    /// Whether messages can be handed to the transport in this state
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
