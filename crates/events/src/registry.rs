//! Per-key, single-consumer channel registry.
//!
//! The publishing side calls [`ChannelRegistry::open`] before producing and
//! [`ChannelRegistry::close`] when done (after the `Done` sentinel). At most
//! one subscriber takes the receiver via [`ChannelRegistry::attach`] and
//! calls [`ChannelRegistry::detach`] once it has drained the sentinel —
//! removal is deferred to the subscriber so a publisher finishing first can
//! never yank the channel out from under a live read.

use std::collections::HashMap;
use std::sync::Mutex;

use cronhost_core::types::DbId;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

struct Slot<T> {
    sender: Option<UnboundedSender<T>>,
    /// Present until a subscriber attaches.
    receiver: Option<UnboundedReceiver<T>>,
}

/// Map of live channels keyed by execution or script id.
///
/// Channels are unbounded: producers are line-rate bounded by the external
/// process, and a channel only lives for the duration of one run.
pub struct ChannelRegistry<T> {
    channels: Mutex<HashMap<DbId, Slot<T>>>,
}

impl<T> ChannelRegistry<T> {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Open a fresh channel for `key`, replacing any stale prior channel.
    pub fn open(&self, key: DbId) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut channels = self.channels.lock().expect("registry lock poisoned");
        channels.insert(
            key,
            Slot {
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );
    }

    /// Open a channel for `key` unless one already exists.
    ///
    /// Lets a publisher guarantee the channel is there without clobbering
    /// a receiver a subscriber may already have taken from an earlier
    /// [`Self::open`].
    pub fn ensure_open(&self, key: DbId) {
        let mut channels = self.channels.lock().expect("registry lock poisoned");
        if channels.contains_key(&key) {
            return;
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        channels.insert(
            key,
            Slot {
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );
    }

    /// Take the receiver for `key`. At most one subscriber per channel;
    /// returns `None` when the channel is absent or already claimed.
    pub fn attach(&self, key: DbId) -> Option<UnboundedReceiver<T>> {
        let mut channels = self.channels.lock().expect("registry lock poisoned");
        channels.get_mut(&key)?.receiver.take()
    }

    /// Publish an event to `key`'s channel.
    ///
    /// Returns `false` when no channel is open (events are simply dropped —
    /// the persisted record is the durable substitute).
    pub fn publish(&self, key: DbId, event: T) -> bool {
        let channels = self.channels.lock().expect("registry lock poisoned");
        match channels.get(&key).and_then(|slot| slot.sender.as_ref()) {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Publisher-side close, after the terminal sentinel was published.
    ///
    /// Drops the sender so the subscriber observes end-of-stream after the
    /// sentinel. If no subscriber ever attached, the whole entry is removed
    /// here; otherwise removal is the subscriber's job ([`Self::detach`]).
    pub fn close(&self, key: DbId) {
        let mut channels = self.channels.lock().expect("registry lock poisoned");
        let orphaned = match channels.get_mut(&key) {
            Some(slot) => {
                slot.sender = None;
                slot.receiver.is_some()
            }
            None => false,
        };
        if orphaned {
            channels.remove(&key);
        }
    }

    /// Subscriber-side removal after draining the terminal sentinel.
    pub fn detach(&self, key: DbId) {
        let mut channels = self.channels.lock().expect("registry lock poisoned");
        channels.remove(&key);
    }

    /// Whether a channel currently exists for `key`.
    pub fn contains(&self, key: DbId) -> bool {
        let channels = self.channels.lock().expect("registry lock poisoned");
        channels.contains_key(&key)
    }
}

impl<T> Default for ChannelRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
