//! Dispatch/notification bus
//!
//! Fans events out to any number of subscribers. Each subscriber owns an
//! unbounded channel, so delivery to one never waits on another, and the
//! order a subscriber observes is the publish order. Subscribers may come and
//! go at any time; there is no replay for late subscribers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

/// Identifies a registered subscriber
pub type SubscriberId = u64;

/// Receiving end of a bus subscription
#[derive(Debug)]
pub struct Subscription<E> {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Id to pass to [`DispatchBus::unsubscribe`]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Take the next event if one is ready
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }
}

struct Inner<E> {
    next_id: SubscriberId,
    subscribers: Vec<(SubscriberId, mpsc::UnboundedSender<E>)>,
}

/// Event fan-out shared between the core and its subscribers
pub struct DispatchBus<E> {
    inner: Arc<Mutex<Inner<E>>>,
}

impl<E> Clone for DispatchBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for DispatchBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> DispatchBus<E> {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 1,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Clone> DispatchBus<E> {
    /// Deliver an event to every subscriber
    ///
    /// Subscribers whose receiver has been dropped are pruned. Returns the
    /// number of subscribers the event reached.
    pub fn publish(&self, event: E) -> usize {
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
        inner.subscribers.len()
    }
}
