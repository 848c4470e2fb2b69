//! Reassembly of streamed bot replies

use chrono::Utc;

use crate::protocol::{self, InboundFrame};
use crate::timeline::Timeline;
use crate::types::{Message, new_message_id};

/// What a single inbound frame did to the timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A streamed bot reply was opened at the tail
    Started(Message),
    /// A fragment was appended to the open reply
    Delta { id: String, delta: String },
    /// The reply at the tail was finalized
    Finalized(Message),
    /// A complete message was appended and finalized in one step
    Completed(Message),
    /// The frame had no effect
    Ignored,
}

/// Counters kept by the reassembler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Frames that changed the timeline or produced a notification
    pub applied: u64,
    /// Frames that failed to decode
    pub malformed: u64,
    /// Frames that decoded but had no effect
    pub ignored: u64,
}

/// Folds inbound frames into a [`Timeline`].
///
/// The in-progress reply is never stored separately: it is always the tail of
/// the timeline, recognised by being a bot message with `streaming` set.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    stats: ReassemblyStats,
}

impl StreamReassembler {
    /// Create a new reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame counters since creation
    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Decode a raw text payload and apply it.
    ///
    /// Payloads that fail to decode are logged and dropped.
    pub fn ingest(&mut self, timeline: &mut Timeline, raw: &str) -> Applied {
        match InboundFrame::decode(raw) {
            Ok(InboundFrame::Unknown) => {
                tracing::warn!("Ignoring frame of unknown type: {}", raw);
                self.stats.ignored += 1;
                Applied::Ignored
            }
            Ok(frame) => self.apply(timeline, frame),
            Err(e) => {
                tracing::warn!("Discarding malformed frame ({}): {}", e, raw);
                self.stats.malformed += 1;
                Applied::Ignored
            }
        }
    }

    /// Apply a decoded frame to the timeline
    pub fn apply(&mut self, timeline: &mut Timeline, frame: InboundFrame) -> Applied {
        tracing::trace!("Applying {} frame", frame.kind());

        let applied = match frame {
            InboundFrame::Start { message_id } => {
                close_open_stream(timeline);
                let message = Message::bot_streaming(message_id.unwrap_or_else(new_message_id));
                timeline.push(message.clone());
                Applied::Started(message)
            }
            InboundFrame::Token { delta } => match delta {
                Some(delta) if !delta.is_empty() => append_delta(timeline, delta),
                _ => Applied::Ignored,
            },
            InboundFrame::End => {
                close_open_stream(timeline);
                match timeline.last() {
                    Some(message) => Applied::Finalized(message),
                    None => Applied::Ignored,
                }
            }
            InboundFrame::FullMessage {
                id,
                content,
                timestamp,
            } => {
                let timestamp = timestamp
                    .as_ref()
                    .and_then(protocol::parse_timestamp)
                    .unwrap_or_else(Utc::now);
                let content = protocol::content_text(content.as_ref());
                let message = Message::bot(id.unwrap_or_else(new_message_id), content)
                    .with_timestamp(timestamp);
                complete(timeline, message)
            }
            InboundFrame::Error { content, id } => {
                let message = Message::bot(
                    id.unwrap_or_else(new_message_id),
                    protocol::error_text(content.as_ref()),
                );
                complete(timeline, message)
            }
            InboundFrame::Unknown => {
                tracing::warn!("Ignoring frame of unknown type");
                Applied::Ignored
            }
        };

        if applied == Applied::Ignored {
            self.stats.ignored += 1;
        } else {
            self.stats.applied += 1;
        }
        applied
    }
}

fn append_delta(timeline: &mut Timeline, delta: String) -> Applied {
    let mut target = None;
    let appended = timeline.amend_last(|message| {
        if !message.is_open_stream() {
            return false;
        }
        message.content.push_str(&delta);
        target = Some(message.id.clone());
        true
    });

    match target {
        Some(id) if appended => Applied::Delta { id, delta },
        _ => {
            tracing::debug!("Dropping token with no open bot reply");
            Applied::Ignored
        }
    }
}

fn complete(timeline: &mut Timeline, message: Message) -> Applied {
    close_open_stream(timeline);
    timeline.push(message.clone());
    Applied::Completed(message)
}

/// Mark the tail closed if it is a reply still receiving deltas.
fn close_open_stream(timeline: &mut Timeline) -> bool {
    timeline.amend_last(|message| {
        if !message.is_open_stream() {
            return false;
        }
        tracing::debug!("Closing streamed reply {}", message.id);
        message.streaming = false;
        true
    })
}
