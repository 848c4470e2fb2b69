//! Client event types

use ripple_core::Message;
use serde::{Deserialize, Serialize};

/// Events broadcast by a running client session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The channel opened
    Connected,

    /// The channel closed
    Disconnected,

    /// The channel reported an error
    ConnectionError { message: String },

    /// An automatic reconnect is pending
    ReconnectScheduled { attempt: u32, delay_ms: u64 },

    /// Automatic reconnects stopped; connect explicitly to try again
    ReconnectExhausted { attempts: u32 },

    /// A message was appended to the timeline
    MessageAppended { message: Message },

    /// A fragment was appended to the streaming reply
    MessageDelta { id: String, delta: String },

    /// A bot reply is complete
    MessageFinalized { message: Message },

    /// The timeline was emptied
    TimelineCleared,
}

impl ClientEvent {
    /// Check if this event changes the connection lifecycle
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            ClientEvent::Connected
                | ClientEvent::Disconnected
                | ClientEvent::ConnectionError { .. }
                | ClientEvent::ReconnectScheduled { .. }
                | ClientEvent::ReconnectExhausted { .. }
        )
    }
}
