//! The observable conversation store.

use std::sync::Arc;

use tokio::sync::watch;

use crate::message::DisplayMessage;

/// An immutable version of the conversation, newest message first.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    version: u64,
    messages: Arc<[DisplayMessage]>,
}

impl Snapshot {
    /// Returns the version number, which increases on every mutation.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the messages, newest first.
    #[inline]
    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    /// Finds a message by id.
    #[inline]
    pub fn get(&self, id: &str) -> Option<&DisplayMessage> {
        self.messages.iter().find(|msg| msg.id == id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn next(&self, messages: Vec<DisplayMessage>) -> Self {
        Self {
            version: self.version + 1,
            messages: messages.into(),
        }
    }
}

/// Holds the ordered display messages and notifies subscribers on every
/// change.
///
/// Each mutation replaces the whole snapshot, so a [`Snapshot`] obtained
/// earlier never changes under the reader. Mutations are serialized by the
/// underlying channel.
#[derive(Clone)]
pub struct ConversationStore {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current snapshot.
    #[inline]
    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Subscribes to changes. The receiver sees the current snapshot as
    /// already seen.
    #[inline]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Adds a message as the newest one.
    pub fn append(&self, message: DisplayMessage) {
        trace!("append message {}", message.id);
        self.tx.send_modify(|snapshot| {
            let messages = std::iter::once(message)
                .chain(snapshot.messages.iter().cloned())
                .collect();
            *snapshot = snapshot.next(messages);
        });
    }

    /// Replaces the message with the given id by `f(message)`.
    ///
    /// Returns `false` and leaves the store untouched if there is no such
    /// message.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&DisplayMessage) -> DisplayMessage,
    {
        self.tx.send_if_modified(|snapshot| {
            let Some(index) =
                snapshot.messages.iter().position(|msg| msg.id == id)
            else {
                return false;
            };
            let mut messages = snapshot.messages.to_vec();
            let updated = f(&messages[index]);
            messages[index] = updated;
            *snapshot = snapshot.next(messages);
            true
        })
    }

    /// Clears all messages, then seeds the optional welcome message.
    #[inline]
    pub fn reset(&self, welcome: Option<DisplayMessage>) {
        self.replace(welcome, vec![]);
    }

    /// Clears all messages and installs `imported` (in chronological order)
    /// after the optional welcome message, as one mutation.
    pub fn replace(
        &self,
        welcome: Option<DisplayMessage>,
        imported: Vec<DisplayMessage>,
    ) {
        debug!("replace conversation with {} messages", imported.len());
        let messages = imported.into_iter().rev().chain(welcome).collect();
        self.tx.send_modify(|snapshot| {
            *snapshot = snapshot.next(messages);
        });
    }
}
