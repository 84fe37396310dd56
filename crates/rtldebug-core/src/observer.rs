//! Live observation of values at the time cursor.
//!
//! An [`Observer`] keeps one server-side reference (bound under the name it
//! was created with) covering every designation it watches. Whenever the
//! session's time cursor moves it re-reads that reference at the cursor and
//! notifies the callbacks of every value that changed.
//!
//! # Design Principles
//!
//! - Refresh is single-flight. An invalidation while a refresh is running
//!   only marks it dirty; the running refresh loops until it is clean.
//! - Adding a designation discards the bound reference; it is rebound
//!   before the next refresh iteration.
//! - Callbacks run in registration order, outside the observer's lock, so
//!   they may observe, unsubscribe or move the cursor.
//! - Only the latest value of each designation is kept.

use std::any::Any;
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use rtldebug_types::ObserverId;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::designation::Designation;
use crate::error::SessionError;
use crate::reference::{Reference, UnboundReference};
use crate::sample::Sample;
use crate::session::{QueryOptions, Session};
use crate::signal::Subscription;

/// Errors returned by [`Observer::observe`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObserverError {
    /// The key is already observed with a different value type.
    #[error("designation {key:?} is already observed with a different value type")]
    TypeMismatch {
        /// Canonical key of the designation.
        key: String,
    },
}

/// Progress of an observer's refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// No refresh is running.
    Idle,
    /// A refresh is running.
    Running {
        /// Another invalidation arrived; run again when done.
        dirty: bool,
    },
}

type Callback<T> = Box<dyn FnMut(&T) -> ControlFlow<()> + Send>;

struct Observable<T> {
    designation: Designation<T>,
    value: Option<T>,
    callbacks: Vec<(u64, Callback<T>)>,
}

/// Type-erased view of an [`Observable`], so observables of different
/// value types share one ordered map.
trait ErasedObservable: Send {
    fn add_to(&self, unbound: &mut UnboundReference);
    fn update(&mut self, sample: &Sample) -> Option<Box<dyn Delivery>>;
    fn remove_callback(&mut self, id: u64) -> Option<Box<dyn Send>>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Clone + PartialEq + Send + 'static> ErasedObservable for Observable<T> {
    fn add_to(&self, unbound: &mut UnboundReference) {
        unbound.add(&self.designation);
    }

    fn update(&mut self, sample: &Sample) -> Option<Box<dyn Delivery>> {
        let value = sample.value(&self.designation)?;
        if self.value.as_ref() == Some(&value) {
            return None;
        }
        self.value = Some(value.clone());
        if self.callbacks.is_empty() {
            return None;
        }
        Some(Box::new(PendingDelivery {
            key: self.designation.key().to_owned(),
            value,
            callbacks: std::mem::take(&mut self.callbacks),
        }))
    }

    fn remove_callback(&mut self, id: u64) -> Option<Box<dyn Send>> {
        let index = self.callbacks.iter().position(|(other, _)| *other == id)?;
        let (_, callback) = self.callbacks.remove(index);
        Some(Box::new(callback))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Callbacks taken out of an observable to be called without the lock.
trait Delivery: Send {
    fn key(&self) -> &str;
    fn deliver(&mut self);
    /// Hand the surviving callbacks back; returns the ones unsubscribed
    /// meanwhile so they can be dropped outside the lock.
    fn restore(
        self: Box<Self>,
        observable: &mut dyn ErasedObservable,
        removed: &HashSet<u64>,
    ) -> Vec<Box<dyn Send>>;
}

struct PendingDelivery<T> {
    key: String,
    value: T,
    callbacks: Vec<(u64, Callback<T>)>,
}

impl<T: Clone + PartialEq + Send + 'static> Delivery for PendingDelivery<T> {
    fn key(&self) -> &str {
        &self.key
    }

    fn deliver(&mut self) {
        let value = &self.value;
        self.callbacks
            .retain_mut(|(_, callback)| callback(value).is_continue());
    }

    fn restore(
        self: Box<Self>,
        observable: &mut dyn ErasedObservable,
        removed: &HashSet<u64>,
    ) -> Vec<Box<dyn Send>> {
        let Self { callbacks, .. } = *self;
        let Some(observable) = observable.as_any_mut().downcast_mut::<Observable<T>>() else {
            return callbacks
                .into_iter()
                .map(|(_, callback)| Box::new(callback) as Box<dyn Send>)
                .collect();
        };
        let (dropped, mut kept): (Vec<_>, Vec<_>) =
            callbacks.into_iter().partition(|(id, _)| removed.contains(id));
        // Callbacks registered during delivery go after the survivors.
        kept.append(&mut observable.callbacks);
        observable.callbacks = kept;
        dropped
            .into_iter()
            .map(|(_, callback)| Box::new(callback) as Box<dyn Send>)
            .collect()
    }
}

struct ObserverState {
    observables: IndexMap<String, Box<dyn ErasedObservable>>,
    reference: Option<Reference>,
    refresh: RefreshState,
    next_callback_id: u64,
    removed_during_delivery: HashSet<u64>,
    closed: bool,
}

struct ObserverInner {
    id: ObserverId,
    session: Session,
    reference_name: String,
    state: Mutex<ObserverState>,
    settled: Notify,
    cursor_subscription: Mutex<Option<Subscription>>,
}

impl ObserverInner {
    fn invalidate(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            match state.refresh {
                RefreshState::Running { .. } => {
                    state.refresh = RefreshState::Running { dirty: true };
                    return;
                }
                RefreshState::Idle => state.refresh = RefreshState::Running { dirty: false },
            }
        }
        let inner = Arc::clone(self);
        self.session.spawn(async move { inner.refresh_loop().await });
    }

    async fn refresh_loop(self: Arc<Self>) {
        loop {
            let reference = {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                if state.closed || state.observables.is_empty() {
                    state.refresh = RefreshState::Idle;
                    None
                } else {
                    state.refresh = RefreshState::Running { dirty: false };
                    Some(self.current_reference(state))
                }
            };
            let Some(reference) = reference else {
                self.settled.notify_waiters();
                return;
            };

            let options = QueryOptions::default().with_reference(reference.clone());
            match self.session.query_at_cursor(options).await {
                Ok(sample) => self.apply(&sample),
                Err(SessionError::Reference { source }) => {
                    debug!(observer = %self.id, error = %source, "Observer reference went stale");
                    let mut state = self.state.lock();
                    if state
                        .reference
                        .as_ref()
                        .is_some_and(|current| current.epoch() == reference.epoch())
                    {
                        state.reference = None;
                    }
                }
                Err(err) => {
                    warn!(observer = %self.id, error = %err, "Observer refresh failed");
                }
            }

            let again = {
                let mut state = self.state.lock();
                if !state.closed && state.refresh == (RefreshState::Running { dirty: true }) {
                    true
                } else {
                    state.refresh = RefreshState::Idle;
                    false
                }
            };
            if !again {
                self.settled.notify_waiters();
                return;
            }
        }
    }

    /// The bound reference, binding a fresh one if it was discarded.
    fn current_reference(&self, state: &mut ObserverState) -> Reference {
        if let Some(reference) = &state.reference {
            return reference.clone();
        }
        let mut unbound = UnboundReference::new();
        for observable in state.observables.values() {
            observable.add_to(&mut unbound);
        }
        let reference = self.session.bind_reference(&self.reference_name, unbound);
        debug!(
            observer = %self.id,
            reference = %self.reference_name,
            epoch = reference.epoch(),
            observables = state.observables.len(),
            "Observer bound reference"
        );
        state.reference = Some(reference.clone());
        reference
    }

    fn apply(&self, sample: &Sample) {
        let mut deliveries: Vec<Box<dyn Delivery>> = {
            let mut state = self.state.lock();
            state
                .observables
                .values_mut()
                .filter_map(|observable| observable.update(sample))
                .collect()
        };
        if deliveries.is_empty() {
            return;
        }
        for delivery in &mut deliveries {
            delivery.deliver();
        }
        let mut dropped: Vec<Box<dyn Send>> = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let removed = std::mem::take(&mut state.removed_during_delivery);
            for delivery in deliveries {
                let key = delivery.key().to_owned();
                if let Some(observable) = state.observables.get_mut(&key) {
                    dropped.extend(delivery.restore(observable.as_mut(), &removed));
                }
            }
        }
        drop(dropped);
    }

    fn remove_callback(&self, key: &str, id: u64) {
        let removed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let removed = state
                .observables
                .get_mut(key)
                .and_then(|observable| observable.remove_callback(id));
            if removed.is_none() && !state.closed {
                // Possibly out for delivery; filtered when the callbacks return.
                state.removed_during_delivery.insert(id);
            }
            removed
        };
        drop(removed);
    }
}

/// Watches designations at the session's time cursor.
///
/// Dropping the observer stops it; pending refreshes finish without
/// notifying anyone.
pub struct Observer {
    inner: Arc<ObserverInner>,
}

impl Observer {
    /// Create an observer binding its designations under `reference_name`.
    ///
    /// The name must not be shared with another observer or reference on
    /// the same session.
    pub fn new(session: &Session, reference_name: impl Into<String>) -> Self {
        let inner = Arc::new(ObserverInner {
            id: ObserverId::new(),
            session: session.clone(),
            reference_name: reference_name.into(),
            state: Mutex::new(ObserverState {
                observables: IndexMap::new(),
                reference: None,
                refresh: RefreshState::Idle,
                next_callback_id: 0,
                removed_during_delivery: HashSet::new(),
                closed: false,
            }),
            settled: Notify::new(),
            cursor_subscription: Mutex::new(None),
        });
        let weak: Weak<ObserverInner> = Arc::downgrade(&inner);
        let subscription = session.signals().time_cursor_changed.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.invalidate();
            }
        });
        *inner.cursor_subscription.lock() = Some(subscription);
        info!(
            observer = %inner.id,
            reference = %inner.reference_name,
            "Observer created"
        );
        Self { inner }
    }

    /// Call `callback` with the value of `designation` at the cursor
    /// whenever it changes.
    ///
    /// The first registration of a key triggers a refresh; later ones share
    /// the existing observable. The callback is removed when it returns
    /// [`ControlFlow::Break`] or when the returned [`Subscription`] is
    /// dropped; the observable itself stays.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::TypeMismatch`] if the key is already
    /// observed with a different value type.
    pub fn observe<T, F>(
        &self,
        designation: Designation<T>,
        callback: F,
    ) -> Result<Subscription, ObserverError>
    where
        T: Clone + PartialEq + Send + 'static,
        F: FnMut(&T) -> ControlFlow<()> + Send + 'static,
    {
        let key = designation.key().to_owned();
        let (id, created) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let id = state.next_callback_id;
            state.next_callback_id = id.wrapping_add(1);
            let callback: Callback<T> = Box::new(callback);
            if let Some(existing) = state.observables.get_mut(&key) {
                let observable = existing
                    .as_any_mut()
                    .downcast_mut::<Observable<T>>()
                    .ok_or_else(|| ObserverError::TypeMismatch { key: key.clone() })?;
                observable.callbacks.push((id, callback));
                (id, false)
            } else {
                state.observables.insert(
                    key.clone(),
                    Box::new(Observable {
                        designation,
                        value: None,
                        callbacks: vec![(id, callback)],
                    }),
                );
                state.reference = None;
                (id, true)
            }
        };
        if created {
            debug!(observer = %self.inner.id, key = %key, "Observing new designation");
            self.inner.invalidate();
        }
        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_callback(&key, id);
            }
        }))
    }

    /// Last value seen for `designation`, if it is observed and has been
    /// read at least once.
    pub fn query<T: Clone + 'static>(&self, designation: &Designation<T>) -> Option<T> {
        let state = self.inner.state.lock();
        let observable = state.observables.get(designation.key())?;
        observable
            .as_any()
            .downcast_ref::<Observable<T>>()?
            .value
            .clone()
    }

    /// Re-read every observed value at the cursor.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    /// Current refresh state.
    pub fn refresh_state(&self) -> RefreshState {
        self.inner.state.lock().refresh
    }

    /// Wait until no refresh is running.
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.state.lock().refresh == RefreshState::Idle {
                return;
            }
            notified.await;
        }
    }

    /// Stop observing and release the server-side reference.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        let observables = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.reference = None;
            std::mem::take(&mut state.observables)
        };
        drop(observables);
        self.inner.cursor_subscription.lock().take();
        self.inner.session.unbind_reference(&self.inner.reference_name);
        debug!(observer = %self.inner.id, "Observer closed");
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.inner.id)
            .field("reference", &self.inner.reference_name)
            .finish_non_exhaustive()
    }
}
