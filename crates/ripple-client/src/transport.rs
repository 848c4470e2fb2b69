//! Transport channel abstraction
//!
//! A [`Transport`] opens one bidirectional, message-oriented channel per call.
//! Opening never fails synchronously: the outcome is reported through the
//! [`ChannelDriver`] as lifecycle events, which land on the session's event
//! queue stamped with the channel's id. The session keeps the matching
//! [`ChannelHandle`] to send and close. Transports never retry.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Identifies one channel for the lifetime of a session
pub type ChannelId = u64;

/// Lifecycle callbacks raised by a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is open; raised at most once
    Opened,
    /// A raw payload arrived
    Message(String),
    /// The channel hit an error; a close normally follows
    Errored(String),
    /// The channel terminated; raised exactly once
    Closed { reason: Option<String> },
}

/// A channel event stamped with the channel that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub channel: ChannelId,
    pub event: ChannelEvent,
}

/// Queue that channel drivers report into
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Opens channels to a remote endpoint
pub trait Transport: Send + Sync {
    /// Start opening a channel to `url`, reporting through `driver`.
    fn open(&self, url: &str, driver: ChannelDriver);

    /// Check that `url` is an address this transport can open
    fn validate_url(&self, _url: &str) -> Result<()> {
        Ok(())
    }
}

/// Create the two ends of a new channel
pub fn channel(id: ChannelId, events: TransportEventSender) -> (ChannelHandle, ChannelDriver) {
    let ready = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let handle = ChannelHandle {
        id,
        ready: Arc::clone(&ready),
        outbound: outbound_tx,
        cancel: cancel.clone(),
    };
    let driver = ChannelDriver {
        id,
        ready,
        outbound: outbound_rx,
        cancel,
        events,
        opened: false,
        closed: false,
    };
    (handle, driver)
}

/// Session-side end of a channel.
///
/// Dropping the handle closes the channel.
#[derive(Debug)]
pub struct ChannelHandle {
    id: ChannelId,
    ready: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Channel id
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Whether the channel reports an open readiness state
    pub fn is_open(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Queue a payload for transmission.
    ///
    /// Returns false without queueing if the channel is not open.
    pub fn send(&self, payload: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.outbound.send(payload).is_ok()
    }

    /// Request termination. No further events are reported for this channel.
    pub fn close(&self) {
        self.ready.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Transport-side end of a channel.
///
/// Events are reported through this driver. Once the session closes its
/// handle, every report is silently dropped. Dropping a driver that never
/// reported [`closed`](Self::closed) reports it on the way out, so each
/// channel terminates exactly once.
#[derive(Debug)]
pub struct ChannelDriver {
    id: ChannelId,
    ready: Arc<AtomicBool>,
    outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    events: TransportEventSender,
    opened: bool,
    closed: bool,
}

impl ChannelDriver {
    /// Channel id
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Token cancelled when the session closes the channel
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the session has closed the channel
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the next payload the session wants transmitted
    pub async fn recv_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Report a successful open. Later calls are ignored.
    pub fn opened(&mut self) {
        if self.opened {
            return;
        }
        self.opened = true;
        self.ready.store(true, Ordering::Release);
        self.emit(ChannelEvent::Opened);
    }

    /// Report an inbound payload
    pub fn message(&self, payload: impl Into<String>) {
        self.emit(ChannelEvent::Message(payload.into()));
    }

    /// Report an error
    pub fn errored(&self, error: impl ToString) {
        self.ready.store(false, Ordering::Release);
        self.emit(ChannelEvent::Errored(error.to_string()));
    }

    /// Report termination, consuming the driver
    pub fn closed(mut self, reason: Option<String>) {
        self.finish(reason);
    }

    fn finish(&mut self, reason: Option<String>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.ready.store(false, Ordering::Release);
        self.emit(ChannelEvent::Closed { reason });
    }

    fn emit(&self, event: ChannelEvent) {
        if self.cancel.is_cancelled() {
            tracing::trace!("Suppressing {:?} from closed channel {}", event, self.id);
            return;
        }
        let _ = self.events.send(TransportEvent {
            channel: self.id,
            event,
        });
    }
}

impl Drop for ChannelDriver {
    fn drop(&mut self) {
        self.finish(Some("channel dropped".to_string()));
    }
}
