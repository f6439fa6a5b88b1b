//! In-process publish/subscribe with explicit unsubscribe handles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<E>)>>,
}

/// Synchronous fan-out of events to registered listeners.
///
/// Delivery happens on the publishing thread, in subscription order. The
/// listener registry lock is released before listeners run, so a listener may
/// re-enter the notifier (or the store that owns it) without deadlocking.
pub struct Notifier<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Notifier<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a listener. Dropping the returned handle unregisters it.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription
    where
        E: 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.registry.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }

        let registry = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                if let Ok(mut listeners) = registry.listeners.lock() {
                    listeners.retain(|(entry_id, _)| *entry_id != id);
                };
            })),
        }
    }

    /// Deliver `event` to every registered listener, in subscription order.
    pub fn publish(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = match self.registry.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry
            .listeners
            .lock()
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Notifier::subscribe`].
///
/// The listener stays registered for exactly as long as this handle lives.
#[must_use = "dropping a Subscription immediately unsubscribes its listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Unregister the listener now instead of waiting for drop.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
