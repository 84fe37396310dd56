//! Explicit publish/subscribe channels.
//!
//! A [`Signal`] holds an ordered list of subscribers. Emitting a value calls
//! every subscriber in subscription order on the emitting thread.
//!
//! # Design Principles
//!
//! - The subscriber list is snapshotted before delivery, so subscribers may
//!   subscribe or unsubscribe (themselves included) while being called.
//! - No lock is held while a subscriber runs.
//! - [`Subscription`] is an RAII guard: dropping it unsubscribes.
//!   [`Subscription::detach`] keeps the subscriber for the signal's
//!   lifetime.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

/// An ordered multi-subscriber notification channel.
pub struct Signal<T> {
    subscribers: Arc<Mutex<Subscribers<T>>>,
}

impl<T: 'static> Signal<T> {
    /// Create a signal with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Add a subscriber at the end of the delivery order.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut subscribers = self.subscribers.lock();
            let id = subscribers.next_id;
            subscribers.next_id = id.wrapping_add(1);
            subscribers.handlers.push((id, Arc::new(handler)));
            id
        };
        let weak: Weak<Mutex<Subscribers<T>>> = Arc::downgrade(&self.subscribers);
        Subscription::from_fn(move || {
            if let Some(subscribers) = weak.upgrade() {
                subscribers.lock().handlers.retain(|(other, _)| *other != id);
            }
        })
    }

    /// Deliver `value` to every subscriber, in subscription order.
    pub fn emit(&self, value: &T) {
        let handlers: Vec<Handler<T>> = self
            .subscribers
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(value);
        }
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().handlers.len()
    }
}

impl<T: Clone + Send + 'static> Signal<T> {
    /// Subscribe with an async receiver instead of a callback.
    ///
    /// Values emitted after this call are buffered until read.
    pub fn listen(&self) -> Listener<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |value: &T| {
            let _ = sender.send(value.clone());
        });
        Listener {
            receiver,
            _subscription: subscription,
        }
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.subscribers.lock().handlers.len())
            .finish()
    }
}

/// Handle that removes a subscriber when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap an unsubscribe action.
    pub(crate) fn from_fn(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Remove the subscriber now.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keep the subscriber for as long as the signal lives.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Async view of a [`Signal`]; unsubscribes when dropped.
pub struct Listener<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    _subscription: Subscription,
}

impl<T> Listener<T> {
    /// Wait for the next emitted value.
    ///
    /// Returns `None` once the signal has been dropped and every buffered
    /// value has been read.
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Return a buffered value without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}
