//! Ordered message history with change notification.

use tokio::sync::watch;

use crate::types::Message;

/// Ordered, append/amend-only sequence of messages.
///
/// Insertion order is chronological order. Only the last element can be
/// amended. Observers subscribe to a [`watch::Receiver`] and are woken on
/// every change; reading it yields a consistent snapshot.
#[derive(Debug)]
pub struct Timeline {
    tx: watch::Sender<Vec<Message>>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// Create an empty timeline
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self { tx }
    }

    /// Subscribe to changes
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.tx.subscribe()
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.tx.send_modify(|messages| messages.push(message));
    }

    /// Clone of the last message, if any
    pub fn last(&self) -> Option<Message> {
        self.tx.borrow().last().cloned()
    }

    /// Amend the last message in place.
    ///
    /// `f` returns whether it changed anything; observers are only notified
    /// when it did. Returns false on an empty timeline.
    pub fn amend_last<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut Message) -> bool,
    {
        self.tx
            .send_if_modified(|messages| messages.last_mut().is_some_and(f))
    }

    /// Remove every message. Returns false if the timeline was already empty.
    pub fn clear(&mut self) -> bool {
        self.tx.send_if_modified(|messages| {
            if messages.is_empty() {
                return false;
            }
            messages.clear();
            true
        })
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    /// Whether the timeline is empty
    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Read the messages without cloning them
    pub fn with_messages<R>(&self, f: impl FnOnce(&[Message]) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Owned copy of the current messages
    pub fn snapshot(&self) -> Vec<Message> {
        self.tx.borrow().clone()
    }
}
