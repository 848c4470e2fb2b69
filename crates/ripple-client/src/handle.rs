//! A cloneable handle for driving a client session from other tasks.

use std::pin::Pin;

use ripple_core::{ConnectionState, Message};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::Stream;

use crate::error::{Error, Result};
use crate::events::ClientEvent;

/// Stream of client events
pub type ClientEventStream = Pin<Box<dyn Stream<Item = ClientEvent> + Send>>;

/// Requests the session task executes in arrival order
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Send {
        content: String,
        reply: oneshot::Sender<bool>,
    },
    Clear,
    SetUrl {
        url: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// A cloneable handle to a running session.
///
/// Reads come from watch snapshots and never wait on the session task.
/// The session stops once every handle is dropped.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    messages: watch::Receiver<Vec<Message>>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        messages: watch::Receiver<Vec<Message>>,
        state: watch::Receiver<ConnectionState>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            commands,
            messages,
            state,
            events,
        }
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    /// Open the channel if none is open
    pub fn connect(&self) -> Result<()> {
        self.submit(Command::Connect)
    }

    /// Close the channel and cancel any pending reconnect
    pub fn disconnect(&self) -> Result<()> {
        self.submit(Command::Disconnect)
    }

    /// Empty the timeline
    pub fn clear_messages(&self) -> Result<()> {
        self.submit(Command::Clear)
    }

    /// Echo and transmit a message.
    ///
    /// Returns true only if the message was handed to an open channel.
    pub async fn send_message(&self, content: impl Into<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Send {
            content: content.into(),
            reply,
        };
        if self.submit(command).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Change the endpoint used by the next connect
    pub async fn set_url(&self, url: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::SetUrl {
            url: url.into(),
            reply,
        })?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Snapshot of the timeline
    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether sends are accepted, i.e. the state is `Connected`
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Receiver woken on every timeline change after this call
    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        let mut rx = self.messages.clone();
        rx.mark_unchanged();
        rx
    }

    /// Receiver woken on every connection state change after this call
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        let mut rx = self.state.clone();
        rx.mark_unchanged();
        rx
    }

    /// Wait until the connection state satisfies `f`
    pub async fn wait_for_state(
        &self,
        f: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<ConnectionState> {
        let mut state = self.state.clone();
        let reached = state.wait_for(f).await.map_err(|_| Error::Closed)?;
        Ok(*reached)
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Client events as a stream. Lagging subscribers skip missed events.
    pub fn events(&self) -> ClientEventStream {
        let mut rx = self.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event stream lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
