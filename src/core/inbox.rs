//! Buffered bus handles: inbox, outbox and the combined connection.
//!
//! An inbox keeps one FIFO queue per subscribed [`MessageKind`]. Consumers
//! drain a kind with [`MessageInbox::for_each`], which follows a
//! drain-with-compensation protocol:
//!
//! 1. The kind's queue is swapped out when the call is made. Messages arriving
//!    afterwards go to a fresh queue and are not part of this drain.
//! 2. Asking the [`Drain`] for the next message acknowledges the previous one,
//!    which is then gone for good. [`Drain::ack`] acknowledges explicitly.
//! 3. If the drain is dropped early (an `Err` propagated with `?`, a `break`,
//!    a panic), the unacknowledged message and everything not yet yielded are
//!    put back, in their original order, ahead of anything that arrived while
//!    draining.
//!
//! Re-running `for_each` after a handling failure therefore never loses or
//! reorders messages.

use std::collections::{HashMap, VecDeque};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::core::bus::{MessageBus, Subscription};
use crate::core::error::BusError;
use crate::core::message::{BusMessage, Message, MessageKind};

type Queues = HashMap<MessageKind, VecDeque<Message>>;

/// A buffered, receive-only connection to a message bus.
pub struct MessageInbox {
    queues: Arc<Mutex<Queues>>,
    subscriptions: Vec<Subscription>,
}

impl MessageInbox {
    /// Make a disconnected inbox with no queues.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Vec::new(),
        }
    }

    /// Make a disconnected inbox with empty queues for the given kinds.
    pub(crate) fn with_kinds(kinds: &[MessageKind]) -> Self {
        let inbox = Self::new();
        {
            let mut queues = inbox.queues.lock();
            for kind in kinds {
                queues.entry(*kind).or_default();
            }
        }
        inbox
    }

    /// Subscribe to `kinds` on `bus`, buffering everything delivered.
    pub(crate) fn attach(&mut self, bus: &MessageBus, kinds: &[MessageKind]) {
        for &kind in kinds {
            self.queues.lock().entry(kind).or_default();
            if self.subscriptions.iter().any(|sub| sub.kind() == kind) {
                continue;
            }
            let queues = Arc::downgrade(&self.queues);
            let subscription = bus.subscribe_kind(kind, move |message| {
                if let Some(queues) = queues.upgrade() {
                    queues
                        .lock()
                        .entry(message.kind())
                        .or_default()
                        .push_back(message.clone());
                }
            });
            self.subscriptions.push(subscription);
        }
    }

    /// Append a message directly, bypassing the bus.
    pub(crate) fn deliver(&self, message: Message) {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(&message.kind()) {
            queue.push_back(message);
        }
    }

    /// Whether this inbox keeps a queue for `kind`.
    #[must_use]
    pub fn is_subscribed(&self, kind: MessageKind) -> bool {
        self.queues.lock().contains_key(&kind)
    }

    /// Number of pending messages of the given kind.
    ///
    /// # Errors
    ///
    /// [`BusError::UnsubscribedType`] if this inbox never registered for `kind`.
    pub fn count(&self, kind: MessageKind) -> Result<usize, BusError> {
        self.queues
            .lock()
            .get(&kind)
            .map(VecDeque::len)
            .ok_or(BusError::UnsubscribedType(kind))
    }

    /// True if no messages of any kind are pending.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.queues.lock().values().all(VecDeque::is_empty)
    }

    /// Drain the messages of type `M` pending right now, oldest first.
    ///
    /// See the module documentation for the acknowledgement protocol.
    ///
    /// # Errors
    ///
    /// [`BusError::UnsubscribedType`] if this inbox never registered for `M`.
    pub fn for_each<M: BusMessage>(&self) -> Result<Drain<M>, BusError> {
        let pending = {
            let mut queues = self.queues.lock();
            let queue = queues
                .get_mut(&M::KIND)
                .ok_or(BusError::UnsubscribedType(M::KIND))?;
            std::mem::take(queue)
        };
        debug!(kind = %M::KIND, pending = pending.len(), "draining inbox");
        Ok(Drain {
            queues: Arc::clone(&self.queues),
            kind: M::KIND,
            pending,
            in_flight: None,
            _marker: PhantomData,
        })
    }

    /// Run `handler` over the pending messages of type `M`, oldest first.
    ///
    /// Stops at the first error. The message that failed and every message
    /// after it stay queued for the next call. Returns how many messages
    /// were handled.
    ///
    /// # Errors
    ///
    /// The handler's error, or [`BusError::UnsubscribedType`] converted into `E`.
    pub fn handle_each<M, E, F>(&self, mut handler: F) -> Result<usize, E>
    where
        M: BusMessage,
        E: From<BusError>,
        F: FnMut(M) -> Result<(), E>,
    {
        let mut handled = 0;
        for message in self.for_each::<M>()? {
            handler(message)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Unsubscribe from the bus. Pending messages are discarded.
    pub fn close(self) {
        drop(self);
    }
}

impl Default for MessageInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageInbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<MessageKind, usize> = self
            .queues
            .lock()
            .iter()
            .map(|(kind, queue)| (*kind, queue.len()))
            .collect();
        f.debug_struct("MessageInbox")
            .field("pending", &counts)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// One drain of an inbox queue. Produced by [`MessageInbox::for_each`].
///
/// Finite and non-restartable: it covers only the messages pending when it
/// was created. Unacknowledged messages are returned to the inbox on drop.
pub struct Drain<M: BusMessage> {
    queues: Arc<Mutex<Queues>>,
    kind: MessageKind,
    pending: VecDeque<Message>,
    in_flight: Option<Message>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: BusMessage> Drain<M> {
    /// Acknowledge the message most recently yielded.
    ///
    /// Needed only when stopping early after handling it successfully;
    /// fetching the next message acknowledges implicitly.
    pub fn ack(&mut self) {
        self.in_flight = None;
    }

    /// Messages of this drain not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl<M: BusMessage> Iterator for Drain<M> {
    type Item = M;

    fn next(&mut self) -> Option<M> {
        self.in_flight = None;
        while let Some(message) = self.pending.pop_front() {
            if let Some(record) = M::from_message(message.clone()) {
                self.in_flight = Some(message);
                return Some(record);
            }
            error!(
                kind = %self.kind,
                found = %message.kind(),
                "dropping message filed under the wrong kind"
            );
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pending.len()))
    }
}

impl<M: BusMessage> FusedIterator for Drain<M> {}

impl<M: BusMessage> Drop for Drain<M> {
    fn drop(&mut self) {
        let mut remainder: VecDeque<Message> = self.in_flight.take().into_iter().collect();
        remainder.append(&mut self.pending);
        if remainder.is_empty() {
            return;
        }
        debug!(kind = %self.kind, requeued = remainder.len(), "requeueing unhandled messages");
        let mut queues = self.queues.lock();
        let queue = queues.entry(self.kind).or_default();
        remainder.append(queue);
        *queue = remainder;
    }
}

/// A connection to a message bus that can only publish.
#[derive(Debug, Clone, Default)]
pub struct MessageOutbox {
    bus: Option<MessageBus>,
}

impl MessageOutbox {
    /// Make a disconnected outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) const fn bound(bus: MessageBus) -> Self {
        Self { bus: Some(bus) }
    }

    /// Whether this outbox is bound to a bus.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.bus.is_some()
    }

    /// Publish the given message to the connected bus.
    ///
    /// # Errors
    ///
    /// [`BusError::NotConnected`] if the outbox was never bound to a bus.
    pub fn publish(&self, message: impl Into<Message>) -> Result<(), BusError> {
        let bus = self.bus.as_ref().ok_or(BusError::NotConnected)?;
        bus.publish(message);
        Ok(())
    }
}

/// A two-way connection to a message bus: buffers incoming messages of the
/// kinds it was created for and publishes onto the same bus.
///
/// Dropping the connection releases its subscriptions.
#[derive(Debug, Default)]
pub struct MessageBusConnection {
    inbox: MessageInbox,
    outbox: MessageOutbox,
}

impl MessageBusConnection {
    /// Make a connection that is not connected to any bus yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(bus: &MessageBus, kinds: &[MessageKind]) -> Self {
        let mut inbox = MessageInbox::with_kinds(kinds);
        inbox.attach(bus, kinds);
        Self {
            inbox,
            outbox: MessageOutbox::bound(bus.clone()),
        }
    }

    /// The receiving half.
    #[must_use]
    pub const fn inbox(&self) -> &MessageInbox {
        &self.inbox
    }

    /// The sending half.
    #[must_use]
    pub const fn outbox(&self) -> &MessageOutbox {
        &self.outbox
    }

    /// See [`MessageOutbox::publish`].
    ///
    /// # Errors
    ///
    /// [`BusError::NotConnected`] if the connection is not bound to a bus.
    pub fn publish(&self, message: impl Into<Message>) -> Result<(), BusError> {
        self.outbox.publish(message)
    }

    /// See [`MessageInbox::count`].
    ///
    /// # Errors
    ///
    /// [`BusError::UnsubscribedType`] for kinds this connection does not receive.
    pub fn count(&self, kind: MessageKind) -> Result<usize, BusError> {
        self.inbox.count(kind)
    }

    /// See [`MessageInbox::empty`].
    #[must_use]
    pub fn empty(&self) -> bool {
        self.inbox.empty()
    }

    /// See [`MessageInbox::for_each`].
    ///
    /// # Errors
    ///
    /// [`BusError::UnsubscribedType`] for kinds this connection does not receive.
    pub fn for_each<M: BusMessage>(&self) -> Result<Drain<M>, BusError> {
        self.inbox.for_each::<M>()
    }

    /// See [`MessageInbox::handle_each`].
    ///
    /// # Errors
    ///
    /// The handler's error, or [`BusError::UnsubscribedType`] converted into `E`.
    pub fn handle_each<M, E, F>(&self, handler: F) -> Result<usize, E>
    where
        M: BusMessage,
        E: From<BusError>,
        F: FnMut(M) -> Result<(), E>,
    {
        self.inbox.handle_each(handler)
    }

    /// Disconnect, releasing all subscriptions.
    pub fn close(self) {
        drop(self);
    }
}
