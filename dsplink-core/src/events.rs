//! Fan-out of link state to independent observers.
//!
//! Subscribing delivers the current value once, synchronously, before the
//! listener is registered. Broadcasts go out in registration order on a
//! snapshot of the listener list, outside the lock, so a listener that
//! unsubscribes (or another thread that subscribes) never disturbs a
//! broadcast in flight. A listener must not subscribe to the same channel
//! from inside its own callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::flags::ConnectionFlags;
use crate::state::ConnectionState;

/// Identifies one registration, for [`EventChannel::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    current: T,
    listeners: Vec<(ListenerId, Listener<T>)>,
}

/// One observable value with its listeners.
pub struct EventChannel<T> {
    registry: Mutex<Registry<T>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> EventChannel<T> {
    pub fn new(initial: T) -> Self {
        Self {
            registry: Mutex::new(Registry {
                current: initial,
                listeners: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `listener`; it is called with the current value before
    /// this returns.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener<T> = Arc::new(listener);
        // Held across the first callback so no broadcast can slip in
        // between the initial value and the registration.
        let mut registry = self.registry.lock();
        listener(&registry.current);
        registry.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|(lid, _)| *lid != id);
        registry.listeners.len() != before
    }

    /// Store `value` and notify every listener.
    pub fn publish(&self, value: T) {
        let snapshot: Vec<Listener<T>> = {
            let mut registry = self.registry.lock();
            registry.current = value.clone();
            registry.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in snapshot {
            listener(&value);
        }
    }

    pub fn current(&self) -> T {
        self.registry.lock().current.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }
}

impl<T: Clone + Send + Default + 'static> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// The three channels a link publishes.
#[derive(Default)]
pub struct EventBroadcaster {
    pub connection: EventChannel<ConnectionState>,
    /// Whether the target has storage mounted.
    pub storage: EventChannel<bool>,
    pub flags: EventChannel<ConnectionFlags>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_delivers_current_value_first() {
        let channel = EventChannel::new(ConnectionState::Connected);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        channel.subscribe(move |s| sink.lock().push(*s));
        assert_eq!(seen.lock().as_slice(), &[ConnectionState::Connected]);

        channel.publish(ConnectionState::Disconnected);
        assert_eq!(
            seen.lock().as_slice(),
            &[ConnectionState::Connected, ConnectionState::Disconnected]
        );
    }

    #[test]
    fn broadcast_in_registration_order() {
        let channel = EventChannel::new(false);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = order.clone();
            channel.subscribe(move |_| order.lock().push(tag));
        }
        order.lock().clear();
        channel.publish(true);
        assert_eq!(order.lock().as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let channel = EventChannel::new(ConnectionFlags::empty());
        let id = channel.subscribe(|_| {});
        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        assert_eq!(channel.listener_count(), 0);
    }

    #[test]
    fn listener_may_unsubscribe_during_broadcast() {
        let channel = Arc::new(EventChannel::new(0u32));
        let calls = Arc::new(Mutex::new(0));
        let id_slot = Arc::new(Mutex::new(None));

        let ch = channel.clone();
        let slot = id_slot.clone();
        let counter = calls.clone();
        let id = channel.subscribe(move |v| {
            *counter.lock() += 1;
            if *v > 0 {
                if let Some(id) = *slot.lock() {
                    ch.unsubscribe(id);
                }
            }
        });
        *id_slot.lock() = Some(id);

        channel.publish(1);
        channel.publish(2);
        // Initial delivery plus the first broadcast.
        assert_eq!(*calls.lock(), 2);
    }

    #[test]
    fn concurrent_subscribers_see_initial_then_each_value_once() {
        use std::thread;

        const PUBLISHES: u32 = 2_000;
        let channel = Arc::new(EventChannel::new(0u32));

        let publisher = {
            let channel = channel.clone();
            thread::spawn(move || {
                for value in 1..=PUBLISHES {
                    channel.publish(value);
                }
            })
        };

        let mut histories = Vec::new();
        for round in 0..200 {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = seen.clone();
            let before = channel.current();
            let id = channel.subscribe(move |v| sink.lock().push(*v));
            let after = channel.current();

            let first = seen.lock()[0];
            assert!(before <= first && first <= after, "initial {first} outside {before}..={after}");
            // Keep the last one registered to the end.
            if round < 199 {
                thread::yield_now();
                assert!(channel.unsubscribe(id));
            }
            histories.push(seen);
        }
        publisher.join().unwrap();

        for seen in &histories {
            let values = seen.lock();
            assert!(
                values.windows(2).all(|w| w[0] < w[1]),
                "duplicate or reordered delivery: {values:?}"
            );
        }
        let last = histories.last().unwrap().lock();
        assert_eq!(last.last(), Some(&PUBLISHES));
        assert_eq!(channel.listener_count(), 1);
    }
}
