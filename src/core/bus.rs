//! Typed publish/subscribe hub for leader components.
//!
//! Delivery is synchronous: [`MessageBus::publish`] calls every live listener
//! for the message's kind, in registration order, on the publisher's thread.
//! The bus keeps only weak references to handlers. A [`Subscription`] owns its
//! handler and removes the table entry when dropped, so a consumer that goes
//! away stops receiving messages at a well-defined point.

use std::collections::HashMap;
use std::io::BufRead;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::core::error::MessageLogError;
use crate::core::inbox::{MessageBusConnection, MessageInbox, MessageOutbox};
use crate::core::message::{BusMessage, Message, MessageKind};

/// Listener callback stored by the bus.
pub type Handler = dyn Fn(&Message) + Send + Sync;

struct ListenerEntry {
    id: u64,
    handler: Weak<Handler>,
}

#[derive(Default)]
struct BusInner {
    /// Listeners per kind, in registration order.
    listeners: RwLock<HashMap<MessageKind, Vec<ListenerEntry>>>,
    next_listener_id: AtomicU64,
}

impl BusInner {
    fn unregister(&self, kind: MessageKind, id: u64) {
        let mut table = self.listeners.write();
        if let Some(entries) = table.get_mut(&kind) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                table.remove(&kind);
            }
        }
    }
}

/// Central message hub. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a message onto the bus.
    ///
    /// Every listener registered for the message's kind is invoked, even if
    /// an earlier one panics. Handlers run outside the listener table lock,
    /// so they may publish or subscribe themselves. Once all listeners have
    /// been notified, the first panic (if any) is resumed on the caller.
    pub fn publish(&self, message: impl Into<Message>) {
        let message = message.into();
        let kind = message.kind();
        debug!(kind = %kind, ?message, "publishing message");

        let handlers: Vec<Arc<Handler>> = {
            let mut table = self.inner.listeners.write();
            match table.get_mut(&kind) {
                Some(entries) => {
                    entries.retain(|entry| entry.handler.strong_count() > 0);
                    entries
                        .iter()
                        .filter_map(|entry| entry.handler.upgrade())
                        .collect()
                }
                None => Vec::new(),
            }
        };

        let mut first_panic = None;
        for handler in handlers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(&message))) {
                warn!(kind = %kind, "message listener panicked");
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    /// Register `handler` for every future message of `kind`.
    ///
    /// Delivery lasts exactly as long as the returned [`Subscription`] is
    /// alive. Messages published before this call are not replayed.
    pub fn subscribe_kind<F>(&self, kind: MessageKind, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let handler: Arc<Handler> = Arc::new(handler);
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .entry(kind)
            .or_default()
            .push(ListenerEntry {
                id,
                handler: Arc::downgrade(&handler),
            });
        debug!(kind = %kind, listener_id = id, "listening for messages");

        Subscription {
            kind,
            id,
            _handler: handler,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Register a handler that receives the concrete record type `M`.
    pub fn subscribe<M, F>(&self, handler: F) -> Subscription
    where
        M: BusMessage,
        F: Fn(M) + Send + Sync + 'static,
    {
        self.subscribe_kind(M::KIND, move |message| {
            if let Some(record) = M::from_message(message.clone()) {
                handler(record);
            }
        })
    }

    /// Get a two-way connection buffering messages of the given kinds.
    ///
    /// Messages accumulate in the connection until it is dropped.
    #[must_use]
    pub fn connect(&self, kinds: &[MessageKind]) -> MessageBusConnection {
        MessageBusConnection::attach(self, kinds)
    }

    /// Get a receive-only inbox buffering messages of the given kinds.
    #[must_use]
    pub fn inbox(&self, kinds: &[MessageKind]) -> MessageInbox {
        let mut inbox = MessageInbox::with_kinds(kinds);
        inbox.attach(self, kinds);
        inbox
    }

    /// Get a handle that can only publish onto this bus.
    #[must_use]
    pub fn outbox(&self) -> MessageOutbox {
        MessageOutbox::bound(self.clone())
    }

    /// Number of live listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: MessageKind) -> usize {
        self.inner.listeners.read().get(&kind).map_or(0, |entries| {
            entries
                .iter()
                .filter(|entry| entry.handler.strong_count() > 0)
                .count()
        })
    }

    /// Get an inbox holding every message of the given kinds found in a
    /// persisted message log. Trailing partial records are discarded.
    ///
    /// # Errors
    ///
    /// Fails if the stream cannot be read or a complete record is corrupt.
    pub fn decode_bus_messages<R: BufRead>(
        stream: R,
        kinds: &[MessageKind],
    ) -> Result<MessageInbox, MessageLogError> {
        crate::infra::message_log::decode_bus_messages(stream, kinds)
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.listeners.read();
        f.debug_struct("MessageBus")
            .field("kinds", &table.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Owned registration of a listener on a [`MessageBus`].
///
/// Dropping it unregisters the listener immediately.
pub struct Subscription {
    kind: MessageKind,
    id: u64,
    _handler: Arc<Handler>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Kind of message this subscription receives.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// End the subscription now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(self.kind, self.id);
            debug!(kind = %self.kind, listener_id = self.id, "stopped listening");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
