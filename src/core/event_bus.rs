//! Pub/Sub event bus for decoupled component communication.
//!
//! Architecture:
//! - Components subscribe to event types with callbacks (immediate invocation)
//! - emit() invokes callbacks immediately AND queues for deferred processing
//! - poll() returns queued events for batch processing in a host main loop
//!
//! Callback order: FIFO (first-subscribed, first-called) within same event type.
//! Cross-type order undefined - don't rely on ordering between different event types.
//!
//! The document model is single-threaded (one logical thread of control owns
//! the document), so callbacks are plain `Rc` closures and dispatch happens
//! synchronously on the caller's stack. Subscriptions return a [`Connection`]
//! token; owners keep their connections and disconnect on teardown.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::warn;

/// Maximum events in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

/// Marker trait for events.
pub trait Event: Any + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

// Blanket impl for all qualifying types
impl<T: Any + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Type-erased callback
type Callback = Rc<dyn Fn(&dyn Any)>;

/// Subscriber table: event type -> (token, callback) in subscription order
type SubscriberMap = HashMap<TypeId, Vec<(u64, Callback)>>;

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

/// Pub/Sub event bus with deferred processing support.
///
/// Two modes of operation:
/// 1. Immediate: subscribe() + emit() triggers callbacks instantly
/// 2. Deferred: emit() also queues events for poll() in a host main loop
///
/// Both modes work together - callbacks fire immediately, and events
/// are also available for batch processing via poll().
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Rc<RefCell<SubscriberMap>>,
    queue: Rc<RefCell<Vec<BoxedEvent>>>,
    next_token: Rc<Cell<u64>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Pub/Sub (immediate) ==========

    /// Subscribe to events of type E.
    ///
    /// Callback is invoked immediately when emit() is called. Returns a
    /// [`Connection`] that removes the callback on `disconnect()`.
    pub fn subscribe<E, F>(&self, callback: F) -> Connection
    where
        E: Event,
        F: Fn(&E) + 'static,
    {
        let type_id = TypeId::of::<E>();
        let token = self.next_token.get();
        self.next_token.set(token + 1);

        let wrapped: Callback = Rc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribers
            .borrow_mut()
            .entry(type_id)
            .or_default()
            .push((token, wrapped));

        Connection {
            subscribers: Rc::downgrade(&self.subscribers),
            type_id,
            token,
        }
    }

    /// Emit event: invoke callbacks immediately AND queue for deferred processing.
    ///
    /// Callbacks run on a snapshot of the subscriber list, so a handler may
    /// subscribe or disconnect (even itself) without poisoning the dispatch.
    pub fn emit<E: Event + Clone>(&self, event: E) {
        let type_id = TypeId::of::<E>();

        // Snapshot first: handlers are allowed to mutate the subscriber table.
        let callbacks: Vec<Callback> = self
            .subscribers
            .borrow()
            .get(&type_id)
            .map(|cbs| cbs.iter().map(|(_, cb)| Rc::clone(cb)).collect())
            .unwrap_or_default();

        for cb in callbacks {
            cb(&event);
        }

        // Queue for deferred processing with eviction
        let mut queue = self.queue.borrow_mut();
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict_count = queue.len() / 2;
            warn!(
                "EventBus queue full ({} events), evicting oldest {}",
                queue.len(),
                evict_count
            );
            queue.drain(0..evict_count);
        }
        queue.push(Box::new(event));
    }

    // ========== Deferred Processing ==========

    /// Poll all queued events for batch processing.
    ///
    /// Returns all events emitted since last poll.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    // ========== Utilities ==========

    /// Clear all subscribers and the queue
    pub fn clear(&self) {
        self.subscribers.borrow_mut().clear();
        self.queue.borrow_mut().clear();
    }

    /// Check if there are subscribers for event type E
    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscribers
            .borrow()
            .get(&TypeId::of::<E>())
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Check queue length
    pub fn queue_len(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.subscribers.borrow().len())
            .field("queue_len", &self.queue.borrow().len())
            .finish()
    }
}

/// Handle to a single subscription.
///
/// Holds only a weak reference to the bus, so a connection outliving its bus
/// is harmless - disconnect becomes a no-op.
pub struct Connection {
    subscribers: Weak<RefCell<SubscriberMap>>,
    type_id: TypeId,
    token: u64,
}

impl Connection {
    /// Remove the callback from the bus. Safe to call more than once.
    pub fn disconnect(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            if let Some(cbs) = subscribers.borrow_mut().get_mut(&self.type_id) {
                cbs.retain(|(token, _)| *token != self.token);
            }
        }
    }

    /// True while the callback is still registered on a live bus.
    pub fn is_connected(&self) -> bool {
        match self.subscribers.upgrade() {
            Some(subscribers) => subscribers
                .borrow()
                .get(&self.type_id)
                .map(|cbs| cbs.iter().any(|(token, _)| *token == self.token))
                .unwrap_or(false),
            None => false,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("token", &self.token)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Helper: downcast BoxedEvent to concrete type
///
/// IMPORTANT: Must explicitly deref to `dyn Event` before calling `as_any()`.
/// Without explicit deref, the blanket impl `Event for Box<dyn Event>` intercepts
/// the call and returns `&dyn Any` containing `Box<dyn Event>` instead of the
/// original type, causing downcast to always fail.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
