//! Generic copy-before-iterate listener registry.
//!
//! Listener sets are snapshotted before dispatch so a listener can
//! unsubscribe itself (or another listener) during notification without
//! deadlocking or invalidating the iterator. Individual listener panics are
//! caught so one bad listener cannot prevent delivery to the rest.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: u64,
    listener: Listener<T>,
}

/// A set of subscribers for events of type `T`.
pub struct ListenerRegistry<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Entry<T>>>,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` and returns a handle that removes it on drop.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().push(Entry {
            id,
            listener: Arc::new(listener),
        });
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Copies the listener set, then invokes each with `event` in
    /// registration order. A listener that panics is logged and skipped.
    pub fn notify(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = {
            let guard = self.listeners.lock().unwrap();
            guard.iter().map(|entry| entry.listener.clone()).collect()
        };
        for listener in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| listener(event)));
            if result.is_err() {
                tracing::debug!("listener panicked during event dispatch");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().unwrap().retain(|entry| entry.id != id);
    }
}

/// An unsubscribe handle. Dropping it removes the associated listener.
pub struct Subscription<T> {
    id: u64,
    registry: std::sync::Weak<ListenerRegistry<T>>,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notify_invokes_all_subscribers() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        let _sub1 = registry.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = calls.clone();
        let _sub2 = registry.subscribe(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        registry.notify(&42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let sub = registry.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.len(), 1);
        drop(sub);
        assert_eq!(registry.len(), 0);
        registry.notify(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let _sub1 = registry.subscribe(|_| panic!("bad listener"));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let _sub2 = registry.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        registry.notify(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_during_dispatch_is_safe() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let slot: Arc<Mutex<Option<Subscription<u32>>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let sub = registry.subscribe(move |_| {
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);
        registry.notify(&1);
    }
}
