//! Publish/subscribe notification channels.
//!
//! Each notification kind (raw bytes, decoded text, download progress) has its
//! own [`EventBus`]. Subscribing returns a [`Subscription`] that receives every
//! event published afterwards; dropping it (or calling
//! [`EventBus::unsubscribe`]) removes the subscriber.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Identifier of a subscriber on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct BusInner<T> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Sender<T>)>,
}

/// A multi-subscriber broadcast channel for one notification kind.
pub struct EventBus<T> {
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }
}

impl<T: Clone> EventBus<T> {
    /// Create a bus without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber by id. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.subscribers.retain(|(sid, _)| *sid != id);
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: &T) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }
}

/// Receiving end of a bus subscription.
///
/// Unsubscribes itself when dropped.
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: Receiver<T>,
    bus: Weak<Mutex<BusInner<T>>>,
}

impl<T> Subscription<T> {
    /// The subscriber id, usable with [`EventBus::unsubscribe`].
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, if one is already queued.
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next event until `deadline`.
    pub fn recv_until(&self, deadline: Instant) -> Option<T> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.recv_timeout(remaining)
    }

    /// Wait for the next event for at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // Bus gone; keep the caller's timing contract.
                std::thread::sleep(timeout);
                None
            },
        }
    }

    /// Drain every event queued so far.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut inner = bus.lock().unwrap_or_else(PoisonError::into_inner);
            inner.subscribers.retain(|(sid, _)| *sid != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(&"ping".to_string());
        assert_eq!(a.try_recv().as_deref(), Some("ping"));
        assert_eq!(b.try_recv().as_deref(), Some("ping"));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus: EventBus<u32> = EventBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_explicit_unsubscribe() {
        let bus: EventBus<u32> = EventBus::new();
        let sub = bus.subscribe();
        bus.unsubscribe(sub.id());
        bus.publish(&1);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_events_before_subscribe_are_not_seen() {
        let bus: EventBus<u32> = EventBus::new();
        bus.publish(&1);
        let sub = bus.subscribe();
        bus.publish(&2);
        assert_eq!(sub.drain(), vec![2]);
    }

    #[test]
    fn test_recv_timeout_elapses() {
        let bus: EventBus<u32> = EventBus::new();
        let sub = bus.subscribe();
        let start = Instant::now();
        assert!(sub.recv_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
