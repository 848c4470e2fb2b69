//! Chat session: timeline, reassembly and connection lifecycle in one place

use std::sync::Arc;

use ripple_core::{
    Applied, ConnectionState, Message, OutboundFrame, ReassemblyStats, StreamReassembler, Timeline,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use crate::error::Result;
use crate::events::ClientEvent;
use crate::handle::{ClientHandle, Command};
use crate::scheduler::{Outcome, ReconnectPolicy, ReconnectScheduler, Retry};
use crate::transport::{Transport, TransportEvent, TransportEventSender};

/// Default endpoint
pub const DEFAULT_URL: &str = "ws://localhost:8080/ws";

const EVENT_CAPACITY: usize = 1000;

/// Client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Endpoint address
    pub url: String,
    /// Reconnect backoff
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Create a config for `url` with the default reconnect policy
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// A single chat session.
///
/// Every mutation happens through `&mut self`, so the timeline, the
/// reassembler and the scheduler are only ever touched from one context.
/// Use [`spawn`] to run it as a task behind a [`ClientHandle`].
pub struct ChatClient {
    timeline: Timeline,
    reassembler: StreamReassembler,
    scheduler: ReconnectScheduler,
    event_tx: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    /// Create a disconnected session. Channel events are reported to `events`.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        events: TransportEventSender,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            timeline: Timeline::new(),
            reassembler: StreamReassembler::new(),
            scheduler: ReconnectScheduler::new(config.url, config.reconnect, transport, events),
            event_tx,
        }
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of the timeline
    pub fn messages(&self) -> Vec<Message> {
        self.timeline.snapshot()
    }

    /// Subscribe to timeline changes
    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.timeline.subscribe()
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.scheduler.state()
    }

    /// Subscribe to connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.scheduler.watch_state()
    }

    /// Whether sends currently reach the backend.
    ///
    /// Holds exactly while the published state is `Connected`, which is what
    /// [`ClientHandle::is_connected`] reports.
    pub fn is_connected(&self) -> bool {
        self.scheduler.is_connected()
    }

    /// Endpoint the next connect will target
    pub fn url(&self) -> &str {
        self.scheduler.url()
    }

    /// Change the endpoint. An open channel is left alone; the new address is
    /// used by the next connect.
    pub fn set_url(&mut self, url: impl Into<String>) -> Result<()> {
        self.scheduler.set_url(url)
    }

    /// Reassembler counters
    pub fn stats(&self) -> ReassemblyStats {
        self.reassembler.stats()
    }

    /// Open a channel if none is open
    pub fn connect(&mut self) {
        self.scheduler.connect();
    }

    /// Close the channel and stop reconnecting
    pub fn disconnect(&mut self) {
        let was_connected = self.connection_state() != ConnectionState::Disconnected;
        self.scheduler.disconnect();
        if was_connected {
            self.emit(ClientEvent::Disconnected);
        }
    }

    /// Echo `content` into the timeline and transmit it.
    ///
    /// Blank input is rejected without an echo. Otherwise the message is
    /// always appended, and the return value says whether it was handed to
    /// an open channel. Nothing is queued for later delivery.
    pub fn send_message(&mut self, content: &str) -> bool {
        if content.trim().is_empty() {
            tracing::debug!("Ignoring empty message");
            return false;
        }

        let message = Message::user(content);
        self.timeline.push(message.clone());
        self.emit(ClientEvent::MessageAppended {
            message: message.clone(),
        });

        let payload = match OutboundFrame::message(&message).encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode message {}: {}", message.id, e);
                return false;
            }
        };

        if self.scheduler.send(payload) {
            tracing::debug!("Sent message {}", message.id);
            true
        } else {
            tracing::warn!("Not connected; message {} was not sent", message.id);
            false
        }
    }

    /// Remove every message from the timeline
    pub fn clear_messages(&mut self) {
        if self.timeline.clear() {
            tracing::debug!("Timeline cleared");
        }
        self.emit(ClientEvent::TimelineCleared);
    }

    /// Apply a channel event
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match self.scheduler.handle_event(event) {
            Outcome::Stale => {}
            Outcome::Opened => self.emit(ClientEvent::Connected),
            Outcome::Message(raw) => self.ingest(&raw),
            Outcome::Errored(message) => self.emit(ClientEvent::ConnectionError { message }),
            Outcome::Closed { retry, .. } => {
                self.emit(ClientEvent::Disconnected);
                match retry {
                    Retry::Scheduled { attempt, delay } => {
                        self.emit(ClientEvent::ReconnectScheduled {
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                        })
                    }
                    Retry::Exhausted { attempts } => {
                        self.emit(ClientEvent::ReconnectExhausted { attempts })
                    }
                }
            }
        }
    }

    /// When the pending reconnect is due, with the ticket that fires it
    pub fn reconnect_deadline(&self) -> Option<(u64, Instant)> {
        self.scheduler.pending().map(|p| (p.ticket, p.deadline))
    }

    /// Fire the pending reconnect identified by `ticket`
    pub fn fire_reconnect(&mut self, ticket: u64) {
        self.scheduler.fire(ticket);
    }

    fn ingest(&mut self, raw: &str) {
        match self.reassembler.ingest(&mut self.timeline, raw) {
            Applied::Started(message) => self.emit(ClientEvent::MessageAppended { message }),
            Applied::Delta { id, delta } => self.emit(ClientEvent::MessageDelta { id, delta }),
            Applied::Finalized(message) => self.emit(ClientEvent::MessageFinalized { message }),
            Applied::Completed(message) => {
                self.emit(ClientEvent::MessageAppended {
                    message: message.clone(),
                });
                self.emit(ClientEvent::MessageFinalized { message });
            }
            Applied::Ignored => {}
        }
    }

    fn emit(&self, event: ClientEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::Send { content, reply } => {
                let sent = self.send_message(&content);
                let _ = reply.send(sent);
            }
            Command::Clear => self.clear_messages(),
            Command::SetUrl { url, reply } => {
                let _ = reply.send(self.set_url(url));
            }
        }
    }

    /// Drive the session until every handle is dropped.
    ///
    /// Commands, channel events and the reconnect timer are all handled on
    /// this one task. On exit the channel is closed and nothing reconnects.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            let deadline = self.reconnect_deadline();
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = transport_events.recv() => self.handle_transport_event(event),
                ticket = reconnect_due(deadline) => self.fire_reconnect(ticket),
            }
        }

        tracing::debug!("All client handles dropped; shutting down session");
        self.scheduler.disconnect();
    }
}

async fn reconnect_due(deadline: Option<(u64, Instant)>) -> u64 {
    match deadline {
        Some((ticket, at)) => {
            tokio::time::sleep_until(at).await;
            ticket
        }
        None => std::future::pending().await,
    }
}

/// Start a session task and return a handle to it.
///
/// Must be called from within a tokio runtime. The session is created
/// disconnected; call [`ClientHandle::connect`] to open the channel.
pub fn spawn(config: ClientConfig, transport: Arc<dyn Transport>) -> ClientHandle {
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let client = ChatClient::new(config, transport, transport_tx);
    let handle = ClientHandle::new(
        command_tx,
        client.watch_messages(),
        client.watch_state(),
        client.event_tx.clone(),
    );
    tokio::spawn(client.run(command_rx, transport_rx));
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelDriver;
    use crate::transport::mock::MockTransport;
    use ripple_core::Role;
    use serde_json::{Value, json};

    struct Harness {
        client: ChatClient,
        transport: Arc<MockTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        notifications: broadcast::Receiver<ClientEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let transport = MockTransport::new();
            let (tx, events) = mpsc::unbounded_channel();
            let client = ChatClient::new(ClientConfig::new("mock://chat"), transport.clone(), tx);
            let notifications = client.subscribe();
            Self {
                client,
                transport,
                events,
                notifications,
            }
        }

        fn pump(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                self.client.handle_transport_event(event);
            }
        }

        /// Connect and open the channel, returning its driver
        fn connected(&mut self) -> ChannelDriver {
            self.client.connect();
            let mut driver = self.transport.take_driver();
            driver.opened();
            self.pump();
            self.drain();
            driver
        }

        fn receive(&mut self, driver: &ChannelDriver, frame: Value) {
            driver.message(frame.to_string());
            self.pump();
        }

        fn drain(&mut self) -> Vec<ClientEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.notifications.try_recv() {
                events.push(event);
            }
            events
        }
    }

    #[tokio::test]
    async fn test_send_while_disconnected_echoes_and_fails() {
        let mut h = Harness::new();
        assert!(!h.client.send_message("hi"));

        let messages = h.client.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[0].sender, Role::User);
        assert_eq!(h.transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_send_while_connected_transmits_frame() {
        let mut h = Harness::new();
        let mut driver = h.connected();
        assert!(h.client.is_connected());

        assert!(h.client.send_message("hello there"));

        let raw = driver.recv_outbound().await.unwrap();
        let frame: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["content"], "hello there");
        let timestamp = frame["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert!(timestamp.ends_with('Z'));

        let echoed = h.client.messages().pop().unwrap();
        assert_eq!(echoed.content, "hello there");
    }

    #[tokio::test]
    async fn test_open_counts_once_session_handles_it() {
        let mut h = Harness::new();
        h.client.connect();
        let mut driver = h.transport.take_driver();
        driver.opened();

        // the channel is ready but the session has not seen the open yet
        assert!(!h.client.is_connected());
        assert!(!h.client.send_message("early"));
        assert_eq!(h.client.connection_state(), ConnectionState::Connecting);

        h.pump();
        assert!(h.client.is_connected());
        assert!(h.client.send_message("now"));
        let raw = driver.recv_outbound().await.unwrap();
        assert!(raw.contains("\"now\""));
    }

    #[tokio::test]
    async fn test_blank_send_is_rejected_without_echo() {
        let mut h = Harness::new();
        h.connected();
        assert!(!h.client.send_message(""));
        assert!(!h.client.send_message("  \n"));
        assert!(h.client.messages().is_empty());
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_streamed_reply_events() {
        let mut h = Harness::new();
        let driver = h.connected();

        h.receive(&driver, json!({"type": "start", "message_id": "m1"}));
        h.receive(&driver, json!({"type": "token", "delta": "Hel"}));
        h.receive(&driver, json!({"type": "token", "delta": "lo"}));
        h.receive(&driver, json!({"type": "done"}));

        let events = h.drain();
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            ClientEvent::MessageAppended { message } if message.id == "m1"
        ));
        assert_eq!(
            events[2],
            ClientEvent::MessageDelta {
                id: "m1".into(),
                delta: "lo".into()
            }
        );
        match &events[3] {
            ClientEvent::MessageFinalized { message } => {
                assert_eq!(message.content, "Hello");
                assert!(!message.streaming);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.client.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_full_message_appends_then_finalizes() {
        let mut h = Harness::new();
        let driver = h.connected();
        h.receive(
            &driver,
            json!({"type": "full_message", "id": "x", "content": "Hi there"}),
        );

        let events = h.drain();
        assert!(matches!(&events[..], [
            ClientEvent::MessageAppended { message: a },
            ClientEvent::MessageFinalized { message: b },
        ] if a == b && a.content == "Hi there"));
    }

    #[tokio::test]
    async fn test_conversation_order() {
        let mut h = Harness::new();
        let driver = h.connected();

        h.client.send_message("question");
        h.receive(&driver, json!({"type": "start", "message_id": "r1"}));
        h.receive(&driver, json!({"type": "token", "delta": "answer"}));
        h.receive(&driver, json!({"type": "end"}));
        h.receive(&driver, json!({"type": "unknown_kind"}));
        h.receive(&driver, json!({"type": "error", "content": "quota"}));

        let contents: Vec<(Role, String)> = h
            .client
            .messages()
            .into_iter()
            .map(|m| (m.sender, m.content))
            .collect();
        assert_eq!(
            contents,
            vec![
                (Role::User, "question".to_string()),
                (Role::Bot, "answer".to_string()),
                (Role::Bot, "Error: quota".to_string()),
            ]
        );
        assert_eq!(h.client.stats().ignored, 1);
    }

    #[tokio::test]
    async fn test_clear_messages() {
        let mut h = Harness::new();
        h.client.send_message("one");
        h.client.send_message("two");
        h.drain();

        h.client.clear_messages();
        assert!(h.client.messages().is_empty());
        assert_eq!(h.drain(), vec![ClientEvent::TimelineCleared]);
    }

    #[tokio::test]
    async fn test_error_then_close_schedules_reconnect() {
        let mut h = Harness::new();
        h.client.connect();
        let driver = h.transport.take_driver();

        driver.errored("connection refused");
        h.pump();
        assert_eq!(h.client.connection_state(), ConnectionState::Error);

        driver.closed(Some("connection refused".into()));
        h.pump();
        assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            h.drain(),
            vec![
                ClientEvent::ConnectionError {
                    message: "connection refused".into()
                },
                ClientEvent::Disconnected,
                ClientEvent::ReconnectScheduled {
                    attempt: 1,
                    delay_ms: 2000
                },
            ]
        );
        assert!(h.client.reconnect_deadline().is_some());
    }

    #[tokio::test]
    async fn test_disconnect_emits_once() {
        let mut h = Harness::new();
        let _driver = h.connected();

        h.client.disconnect();
        h.client.disconnect();
        assert_eq!(h.drain(), vec![ClientEvent::Disconnected]);
        assert!(!h.client.is_connected());
        assert!(!h.client.send_message("after"));
    }

    #[tokio::test]
    async fn test_set_url_applies_on_next_connect() {
        let mut h = Harness::new();
        assert!(h.client.set_url("ftp://nope").is_err());

        h.client.set_url("mock://elsewhere").unwrap();
        h.client.connect();
        assert_eq!(h.transport.opened_urls(), vec!["mock://elsewhere"]);
    }

    #[tokio::test]
    async fn test_stale_channel_events_are_ignored() {
        let mut h = Harness::new();
        let _driver = h.connected();

        h.client.handle_transport_event(TransportEvent {
            channel: 999,
            event: crate::transport::ChannelEvent::Message(
                json!({"type": "full_message", "content": "ghost"}).to_string(),
            ),
        });
        assert!(h.client.messages().is_empty());
        assert!(h.drain().is_empty());
    }
}
