//! Connection lifecycle and reconnect backoff

use std::sync::Arc;
use std::time::Duration;

use ripple_core::ConnectionState;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::Result;
use crate::transport::{
    self, ChannelEvent, ChannelHandle, ChannelId, Transport, TransportEvent, TransportEventSender,
};

/// Reconnect configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive automatic reconnects
    pub max_attempts: u32,
    /// Base delay, multiplied once per attempt
    pub initial_delay: Duration,
    /// Maximum delay between reconnects
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Calculate delay for a given attempt (1-indexed: the first reconnect is attempt 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// A reconnect waiting for its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    /// Identity used to fire or cancel this reconnect
    pub ticket: u64,
    /// Attempt number this reconnect will make
    pub attempt: u32,
    /// Delay it was scheduled with
    pub delay: Duration,
    /// When it becomes due
    pub deadline: Instant,
}

/// What the scheduler decided after a channel closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// A reconnect is pending
    Scheduled { attempt: u32, delay: Duration },
    /// The attempt budget is spent; only an explicit connect recovers
    Exhausted { attempts: u32 },
}

/// Result of feeding a channel event to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event came from a channel that is no longer current
    Stale,
    /// The channel opened
    Opened,
    /// A payload arrived on the current channel
    Message(String),
    /// The channel reported an error
    Errored(String),
    /// The channel closed
    Closed { reason: Option<String>, retry: Retry },
}

/// Owns the single transport channel and decides when to (re)open it.
pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    events: TransportEventSender,
    url: String,
    state: watch::Sender<ConnectionState>,
    attempts: u32,
    channel: Option<ChannelHandle>,
    pending: Option<PendingReconnect>,
    next_channel: ChannelId,
    next_ticket: u64,
}

impl ReconnectScheduler {
    /// Create a scheduler in the `Disconnected` state
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        transport: Arc<dyn Transport>,
        events: TransportEventSender,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            policy,
            transport,
            events,
            url: url.into(),
            state,
            attempts: 0,
            channel: None,
            pending: None,
            next_channel: 1,
            next_ticket: 1,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Consecutive unexpected closes since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Backoff policy in use
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Endpoint the next connect will target
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Change the endpoint. Takes effect on the next connect.
    pub fn set_url(&mut self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        self.transport.validate_url(&url)?;
        tracing::debug!("Endpoint set to {}", url);
        self.url = url;
        Ok(())
    }

    /// The reconnect waiting to fire, if any
    pub fn pending(&self) -> Option<&PendingReconnect> {
        self.pending.as_ref()
    }

    /// Whether the current channel is open for sending
    pub fn is_open(&self) -> bool {
        self.channel.as_ref().is_some_and(ChannelHandle::is_open)
    }

    /// Open a channel to the configured endpoint.
    ///
    /// Does nothing if a channel is already open. A channel that is still
    /// opening is abandoned in favour of the new one. Returns whether an
    /// open was started.
    pub fn connect(&mut self) -> bool {
        if self.is_open() {
            tracing::debug!("Connect requested while already connected");
            return false;
        }

        self.cancel_pending();
        if let Some(stale) = self.channel.take() {
            tracing::debug!("Abandoning channel {} that never opened", stale.id());
            stale.close();
        }

        let id = self.next_channel;
        self.next_channel += 1;
        self.set_state(ConnectionState::Connecting);
        tracing::info!("Connecting to {} (channel {})", self.url, id);

        let (handle, driver) = transport::channel(id, self.events.clone());
        self.channel = Some(handle);
        self.transport.open(&self.url, driver);
        true
    }

    /// Close the channel and cancel any pending reconnect. Never re-arms.
    pub fn disconnect(&mut self) {
        self.cancel_pending();
        if let Some(channel) = self.channel.take() {
            tracing::info!("Disconnecting channel {}", channel.id());
            channel.close();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Whether sends are accepted: the session has seen the current channel
    /// open and it is still open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.is_open()
    }

    /// Transmit a payload on the current channel.
    ///
    /// Refused unless [`is_connected`](Self::is_connected) holds.
    pub fn send(&self, payload: String) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        self.channel
            .as_ref()
            .is_some_and(|channel| channel.send(payload))
    }

    /// Fire the pending reconnect if `ticket` still identifies it
    pub fn fire(&mut self, ticket: u64) -> bool {
        match self.pending {
            Some(pending) if pending.ticket == ticket => {
                self.pending = None;
                tracing::info!(
                    "Reconnecting (attempt {}/{})",
                    pending.attempt,
                    self.policy.max_attempts
                );
                self.connect()
            }
            _ => {
                tracing::debug!("Ignoring cancelled reconnect {}", ticket);
                false
            }
        }
    }

    /// Apply a lifecycle event from the transport
    pub fn handle_event(&mut self, event: TransportEvent) -> Outcome {
        let current = self.channel.as_ref().map(ChannelHandle::id);
        if current != Some(event.channel) {
            tracing::debug!(
                "Ignoring {:?} from stale channel {}",
                event.event,
                event.channel
            );
            return Outcome::Stale;
        }

        match event.event {
            ChannelEvent::Opened => {
                tracing::info!("Connected to {}", self.url);
                self.attempts = 0;
                self.set_state(ConnectionState::Connected);
                Outcome::Opened
            }
            ChannelEvent::Message(payload) => Outcome::Message(payload),
            ChannelEvent::Errored(error) => {
                tracing::error!("Connection error: {}", error);
                if matches!(
                    self.state(),
                    ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    self.set_state(ConnectionState::Error);
                }
                Outcome::Errored(error)
            }
            ChannelEvent::Closed { reason } => {
                tracing::info!(
                    "Connection closed{}",
                    reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default()
                );
                self.channel = None;
                self.set_state(ConnectionState::Disconnected);
                let retry = self.schedule_retry();
                Outcome::Closed { reason, retry }
            }
        }
    }

    fn schedule_retry(&mut self) -> Retry {
        if self.attempts >= self.policy.max_attempts {
            tracing::warn!(
                "Giving up after {} reconnect attempts; connect again to retry",
                self.attempts
            );
            return Retry::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        let delay = self.policy.delay_for_attempt(self.attempts);
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending = Some(PendingReconnect {
            ticket,
            attempt: self.attempts,
            delay,
            deadline: Instant::now() + delay,
        });
        tracing::info!(
            "Reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            self.attempts,
            self.policy.max_attempts
        );
        Retry::Scheduled {
            attempt: self.attempts,
            delay,
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!("Cancelled pending reconnect {}", pending.ticket);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!("Connection state {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelDriver;
    use crate::transport::mock::MockTransport;
    use tokio::sync::mpsc;

    struct Harness {
        scheduler: ReconnectScheduler,
        transport: Arc<MockTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        live: Vec<ChannelDriver>,
    }

    impl Harness {
        fn new() -> Self {
            let transport = MockTransport::new();
            let (tx, events) = mpsc::unbounded_channel();
            let scheduler = ReconnectScheduler::new(
                "mock://chat",
                ReconnectPolicy::default(),
                transport.clone(),
                tx,
            );
            Self {
                scheduler,
                transport,
                events,
                live: Vec::new(),
            }
        }

        fn pump(&mut self) -> Vec<Outcome> {
            let mut outcomes = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                outcomes.push(self.scheduler.handle_event(event));
            }
            outcomes
        }

        fn open_current(&mut self) {
            let mut driver = self.transport.take_driver();
            driver.opened();
            self.live.push(driver);
            self.pump();
        }

        fn close_current(&mut self) -> Retry {
            let driver = self
                .live
                .pop()
                .unwrap_or_else(|| self.transport.take_driver());
            driver.closed(None);
            match self.pump().pop() {
                Some(Outcome::Closed { retry, .. }) => retry,
                other => panic!("expected close, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_policy_delays() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (1..=6)
            .map(|n| policy.delay_for_attempt(n).as_millis())
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[tokio::test]
    async fn test_connect_transitions_to_connecting_then_connected() {
        let mut h = Harness::new();
        assert_eq!(h.scheduler.state(), ConnectionState::Disconnected);

        assert!(h.scheduler.connect());
        assert_eq!(h.scheduler.state(), ConnectionState::Connecting);
        assert_eq!(h.transport.opened_urls(), vec!["mock://chat"]);

        h.open_current();
        assert_eq!(h.scheduler.state(), ConnectionState::Connected);
        assert!(h.scheduler.is_open());

        // a second connect while open is a no-op
        assert!(!h.scheduler.connect());
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_backoff_sequence_then_exhaustion() {
        let mut h = Harness::new();
        h.scheduler.connect();

        let mut delays = Vec::new();
        for attempt in 1..=5 {
            match h.close_current() {
                Retry::Scheduled { attempt: n, delay } => {
                    assert_eq!(n, attempt);
                    delays.push(delay.as_millis());
                }
                other => panic!("expected a scheduled retry, got {other:?}"),
            }
            assert_eq!(h.scheduler.state(), ConnectionState::Disconnected);
            let ticket = h.scheduler.pending().unwrap().ticket;
            assert!(h.scheduler.fire(ticket));
            assert_eq!(h.scheduler.state(), ConnectionState::Connecting);
        }
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);

        assert_eq!(h.close_current(), Retry::Exhausted { attempts: 5 });
        assert!(h.scheduler.pending().is_none());
        assert_eq!(h.scheduler.state(), ConnectionState::Disconnected);
        assert_eq!(h.transport.open_count(), 6);
    }

    #[tokio::test]
    async fn test_successful_open_resets_counter() {
        let mut h = Harness::new();
        h.scheduler.connect();
        h.close_current();
        let ticket = h.scheduler.pending().unwrap().ticket;
        h.scheduler.fire(ticket);
        h.close_current();
        assert_eq!(h.scheduler.attempts(), 2);

        let ticket = h.scheduler.pending().unwrap().ticket;
        h.scheduler.fire(ticket);
        h.open_current();
        assert_eq!(h.scheduler.attempts(), 0);

        match h.close_current() {
            Retry::Scheduled { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_secs(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_then_close() {
        let mut h = Harness::new();
        h.scheduler.connect();
        let driver = h.transport.take_driver();
        driver.errored("refused");
        let outcomes = h.pump();
        assert_eq!(outcomes, vec![Outcome::Errored("refused".into())]);
        assert_eq!(h.scheduler.state(), ConnectionState::Error);
        assert!(h.scheduler.pending().is_none());

        driver.closed(Some("refused".into()));
        let outcomes = h.pump();
        assert!(matches!(
            outcomes.as_slice(),
            [Outcome::Closed {
                retry: Retry::Scheduled { attempt: 1, .. },
                ..
            }]
        ));
        assert_eq!(h.scheduler.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let mut h = Harness::new();
        h.scheduler.connect();
        h.close_current();
        let ticket = h.scheduler.pending().unwrap().ticket;

        h.scheduler.disconnect();
        assert!(h.scheduler.pending().is_none());
        assert!(!h.scheduler.fire(ticket));
        assert_eq!(h.scheduler.state(), ConnectionState::Disconnected);
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_explicit_connect_supersedes_pending_reconnect() {
        let mut h = Harness::new();
        h.scheduler.connect();
        h.close_current();
        let ticket = h.scheduler.pending().unwrap().ticket;

        assert!(h.scheduler.connect());
        assert!(h.scheduler.pending().is_none());
        assert!(!h.scheduler.fire(ticket));
        assert_eq!(h.transport.open_count(), 2);
    }

    #[tokio::test]
    async fn test_events_from_abandoned_channel_are_stale() {
        let mut h = Harness::new();
        h.scheduler.connect();
        let first = h.transport.take_driver();
        let first_id = first.id();
        h.live.push(first);

        // still connecting; a new connect abandons the first channel
        h.scheduler.connect();
        let outcome = h.scheduler.handle_event(TransportEvent {
            channel: first_id,
            event: ChannelEvent::Opened,
        });
        assert_eq!(outcome, Outcome::Stale);
        assert_eq!(h.scheduler.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_send_requires_open_channel() {
        let mut h = Harness::new();
        assert!(!h.scheduler.send("nobody".into()));
        h.scheduler.connect();
        assert!(!h.scheduler.send("too early".into()));
        assert!(!h.scheduler.is_connected());
        h.open_current();
        assert!(h.scheduler.is_connected());
        assert!(h.scheduler.send("hello".into()));
    }

    #[test]
    fn test_set_url_validates() {
        let mut h = Harness::new();
        assert!(h.scheduler.set_url("http://nope").is_err());
        assert_eq!(h.scheduler.url(), "mock://chat");
        h.scheduler.set_url("mock://other").unwrap();
        assert_eq!(h.scheduler.url(), "mock://other");
    }
}
