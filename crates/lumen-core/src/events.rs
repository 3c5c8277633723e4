//! Publish/subscribe event bus.
//!
//! Every observable component (endpoint manager, feed adapters, aggregator)
//! owns one [`EventBus`]. Observers register a listener and get back a
//! [`Subscription`]; cancelling or dropping it guarantees that no further
//! event reaches that listener once `cancel()` returns.
//!
//! Delivery happens synchronously on the emitting task while a read lock is
//! held, and cancellation takes the write lock. That ordering is what makes
//! the "no delivery after cancel" guarantee hold. As a consequence a listener
//! must not cancel its own subscription from inside the callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Listener callback invoked for every emitted event.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    listeners: RwLock<Vec<(u64, Listener<E>)>>,
    next_id: AtomicU64,
}

/// Multi-listener event fan-out.
pub struct EventBus<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry) }
    }
}

impl<E: Send + Sync + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + Sync + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a listener. Keep the returned [`Subscription`] alive for as
    /// long as events should be delivered.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners.write().push((id, Arc::new(listener)));

        let registry = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.listeners.write().retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Deliver `event` to every registered listener, in subscription order.
    pub fn emit(&self, event: &E) {
        let listeners = self.registry.listeners.read();
        for (_, listener) in listeners.iter() {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.listeners.read().len()
    }
}

impl<E: Clone + Send + Sync + 'static> EventBus<E> {
    /// Channel-style subscription: every event is cloned into an unbounded
    /// queue. The queue stops filling as soon as the subscription is cancelled
    /// or dropped.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribe(move |event: &E| {
            let _ = tx.send(event.clone());
        });
        (sub, rx)
    }
}

/// Cancellation handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Stop delivery. Once this returns, the listener is never called again.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_to_all_listeners() {
        let bus: EventBus<u32> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = Arc::clone(&hits);
        let h2 = Arc::clone(&hits);
        let _s1 = bus.subscribe(move |v| {
            h1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let _s2 = bus.subscribe(move |v| {
            h2.fetch_add(*v as usize, Ordering::SeqCst);
        });

        bus.emit(&3);
        assert_eq!(hits.load(Ordering::SeqCst), 6);
        assert_eq!(bus.listener_count(), 2);
    }

    #[test]
    fn cancel_stops_delivery() {
        let bus: EventBus<u32> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&1);
        sub.cancel();
        bus.emit(&1);
        bus.emit(&1);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn drop_unsubscribes() {
        let bus: EventBus<&'static str> = EventBus::new();
        {
            let _sub = bus.subscribe(|_| {});
            assert_eq!(bus.listener_count(), 1);
        }
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let bus: EventBus<u8> = EventBus::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        sub.cancel();
    }

    #[tokio::test]
    async fn channel_subscription_receives_clones() {
        let bus: EventBus<String> = EventBus::new();
        let (sub, mut rx) = bus.subscribe_channel();

        bus.emit(&"a".to_string());
        bus.emit(&"b".to_string());
        drop(sub);
        bus.emit(&"c".to_string());

        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
        assert!(rx.recv().await.is_none());
    }
}
