//! Line-oriented rendering of client events

use std::io::{self, Write};

use chrono::Local;
use ripple_client::{ClientEvent, Message, Role};

use crate::utils::{format_delay, truncate_chars};

/// Text produced for one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Conversation text for stdout, printed without an added newline
    Chat(String),
    /// A status line for stderr
    Status(String),
}

/// Turns the event stream into terminal output.
///
/// Streamed replies are printed fragment by fragment on a single line.
#[derive(Debug, Default)]
pub struct EventPrinter {
    streaming: Option<String>,
    last_finalized: Option<String>,
}

impl EventPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render and print an event
    pub fn print(&mut self, event: &ClientEvent) {
        match self.render(event) {
            Some(Output::Chat(text)) => {
                print!("{}", text);
                io::stdout().flush().ok();
            }
            Some(Output::Status(line)) => eprintln!("{}", line),
            None => {}
        }
    }

    /// Render an event without printing it
    pub fn render(&mut self, event: &ClientEvent) -> Option<Output> {
        match event {
            ClientEvent::Connected => Some(Output::Status("[Connected]".into())),
            ClientEvent::Disconnected => Some(Output::Status("[Disconnected]".into())),
            ClientEvent::ConnectionError { message } => {
                Some(Output::Status(format!("[Connection error: {}]", message)))
            }
            ClientEvent::ReconnectScheduled { attempt, delay_ms } => Some(Output::Status(format!(
                "[Reconnecting in {} (attempt {})]",
                format_delay(*delay_ms),
                attempt
            ))),
            ClientEvent::ReconnectExhausted { attempts } => Some(Output::Status(format!(
                "[Gave up after {} reconnect attempts; use /connect to retry]",
                attempts
            ))),
            ClientEvent::MessageAppended { message } if message.is_open_stream() => {
                let cut_off = self.streaming.replace(message.id.clone()).is_some();
                let prefix = if cut_off { "\n" } else { "" };
                Some(Output::Chat(format!("{}bot> ", prefix)))
            }
            ClientEvent::MessageAppended { .. } => None,
            ClientEvent::MessageDelta { id, delta } => {
                if self.streaming.as_ref() == Some(id) {
                    Some(Output::Chat(delta.clone()))
                } else {
                    None
                }
            }
            ClientEvent::MessageFinalized { message } => {
                let text = match self.streaming.take() {
                    Some(id) if id == message.id => "\n".to_string(),
                    Some(_) => format!("\nbot> {}\n", message.content),
                    None if self.last_finalized.as_ref() == Some(&message.id) => return None,
                    None => format!("bot> {}\n", message.content),
                };
                self.last_finalized = Some(message.id.clone());
                Some(Output::Chat(text))
            }
            ClientEvent::TimelineCleared => {
                self.streaming = None;
                self.last_finalized = None;
                None
            }
        }
    }
}

/// Format the timeline for `/history`
pub fn format_history(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "No messages yet.".to_string();
    }

    messages
        .iter()
        .map(|message| {
            let who = match message.sender {
                Role::User => "you",
                Role::Bot => "bot",
            };
            let time = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
            let text = truncate_chars(&message.content, 200).replace('\n', " ");
            let marker = if message.streaming { " ..." } else { "" };
            format!("[{}] {}: {}{}", time, who, text, marker)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(printer: &mut EventPrinter, events: &[ClientEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match printer.render(e) {
                Some(Output::Chat(text)) => Some(text),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_streamed_reply_prints_on_one_line() {
        let mut printer = EventPrinter::new();
        let mut open = Message::bot_streaming("m1");
        let events = vec![
            ClientEvent::MessageAppended {
                message: Message::user("hi"),
            },
            ClientEvent::MessageAppended {
                message: open.clone(),
            },
            ClientEvent::MessageDelta {
                id: "m1".into(),
                delta: "Hel".into(),
            },
            ClientEvent::MessageDelta {
                id: "m1".into(),
                delta: "lo".into(),
            },
            ClientEvent::MessageFinalized {
                message: {
                    open.content = "Hello".into();
                    open.streaming = false;
                    open.clone()
                },
            },
        ];
        assert_eq!(chat(&mut printer, &events), "bot> Hello\n");
    }

    #[test]
    fn test_complete_message_printed_once() {
        let mut printer = EventPrinter::new();
        let message = Message::bot("x", "Hi there");
        let finalized = ClientEvent::MessageFinalized {
            message: message.clone(),
        };
        let events = vec![
            ClientEvent::MessageAppended { message },
            finalized.clone(),
            finalized,
        ];
        assert_eq!(chat(&mut printer, &events), "bot> Hi there\n");
    }

    #[test]
    fn test_status_lines() {
        let mut printer = EventPrinter::new();
        assert_eq!(
            printer.render(&ClientEvent::ReconnectScheduled {
                attempt: 3,
                delay_ms: 8000
            }),
            Some(Output::Status("[Reconnecting in 8s (attempt 3)]".into()))
        );
        assert!(matches!(
            printer.render(&ClientEvent::ReconnectExhausted { attempts: 5 }),
            Some(Output::Status(line)) if line.contains("/connect")
        ));
    }

    #[test]
    fn test_format_history() {
        assert_eq!(format_history(&[]), "No messages yet.");

        let history = format_history(&[
            Message::user("question"),
            Message::bot("b", "line\nbreak"),
        ]);
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("you: question"));
        assert!(lines[1].ends_with("bot: line break"));
    }
}
