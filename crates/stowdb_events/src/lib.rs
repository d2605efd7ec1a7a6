//! # stowdb Events
//!
//! A small typed publish/subscribe emitter.
//!
//! Each event type declares its *kind* (the event name) and carries its own
//! payload, so the name-to-payload mapping lives in the type system:
//!
//! ```
//! use stowdb_events::{Emitter, Event};
//!
//! #[derive(Debug, Clone)]
//! enum Door {
//!     Opened { by: String },
//!     Closed,
//! }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum DoorKind {
//!     Opened,
//!     Closed,
//! }
//!
//! impl Event for Door {
//!     type Kind = DoorKind;
//!     fn kind(&self) -> DoorKind {
//!         match self {
//!             Door::Opened { .. } => DoorKind::Opened,
//!             Door::Closed => DoorKind::Closed,
//!         }
//!     }
//! }
//!
//! let emitter = Emitter::<Door>::new();
//! emitter.on(DoorKind::Opened, |e| println!("{e:?}"));
//! assert_eq!(emitter.emit(&Door::Opened { by: "ada".into() }), 1);
//! assert_eq!(emitter.emit(&Door::Closed), 0);
//! ```
//!
//! Delivery is synchronous and in subscription order. The set of receivers
//! is fixed at the moment `emit` is called; handlers may subscribe or
//! unsubscribe re-entrantly without affecting the current delivery.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An event that can be published through an [`Emitter`].
pub trait Event {
    /// The event name type. Subscriptions are keyed by kind.
    type Kind: Copy + Eq + Hash + fmt::Debug;

    /// Returns the kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// Identifies a subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscriber<E: Event> {
    id: SubscriptionId,
    kind: E::Kind,
    once: bool,
    handler: Handler<E>,
}

/// A typed event emitter.
pub struct Emitter<E: Event> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
    next_id: AtomicU64,
}

impl<E: Event> Emitter<E> {
    /// Creates an emitter with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes `handler` to every event of `kind`.
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(kind, false, Arc::new(handler))
    }

    /// Subscribes `handler` to the next event of `kind` only.
    pub fn once<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(kind, true, Arc::new(handler))
    }

    /// Removes a subscription.
    ///
    /// Returns `false` if the subscription was already removed (or was a
    /// one-shot subscription that has fired).
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Delivers `event` to all current subscribers of its kind.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler<E>> = {
            let mut subscribers = self.subscribers.lock();
            let handlers = subscribers
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| Arc::clone(&s.handler))
                .collect();
            subscribers.retain(|s| !(s.once && s.kind == kind));
            handlers
        };

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Returns the number of subscriptions for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Removes every subscription.
    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }

    fn subscribe(&self, kind: E::Kind, once: bool, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push(Subscriber {
            id,
            kind,
            once,
            handler,
        });
        id
    }
}

impl<E: Event> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        Number(u32),
        Text(String),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum PingKind {
        Number,
        Text,
    }

    impl Event for Ping {
        type Kind = PingKind;

        fn kind(&self) -> PingKind {
            match self {
                Ping::Number(_) => PingKind::Number,
                Ping::Text(_) => PingKind::Text,
            }
        }
    }

    #[test]
    fn delivers_only_matching_kind() {
        let emitter = Emitter::<Ping>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        emitter.on(PingKind::Number, move |e| sink.lock().push(e.clone()));

        assert_eq!(emitter.emit(&Ping::Number(7)), 1);
        assert_eq!(emitter.emit(&Ping::Text("x".into())), 0);
        assert_eq!(*seen.lock(), vec![Ping::Number(7)]);
    }

    #[test]
    fn delivery_is_in_subscription_order() {
        let emitter = Emitter::<Ping>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            emitter.on(PingKind::Text, move |_| order.lock().push(i));
        }

        emitter.emit(&Ping::Text("go".into()));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn once_fires_a_single_time() {
        let emitter = Emitter::<Ping>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        emitter.once(PingKind::Number, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&Ping::Number(1));
        emitter.emit(&Ping::Number(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(PingKind::Number), 0);
    }

    #[test]
    fn off_removes_subscription() {
        let emitter = Emitter::<Ping>::new();
        let id = emitter.on(PingKind::Number, |_| {});

        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        assert_eq!(emitter.emit(&Ping::Number(3)), 0);
    }

    #[test]
    fn reentrant_subscribe_does_not_join_current_delivery() {
        let emitter = Arc::new(Emitter::<Ping>::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&emitter);
        let c = Arc::clone(&count);
        emitter.on(PingKind::Number, move |_| {
            let c = Arc::clone(&c);
            inner.on(PingKind::Number, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(emitter.emit(&Ping::Number(1)), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.emit(&Ping::Number(2)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let emitter = Emitter::<Ping>::new();
        emitter.on(PingKind::Number, |_| {});
        emitter.on(PingKind::Text, |_| {});
        emitter.clear();
        assert_eq!(emitter.listener_count(PingKind::Number), 0);
        assert_eq!(emitter.listener_count(PingKind::Text), 0);
    }
}
