//! Subscriber side of the update dispatcher.

use super::Registry;
use crate::domain::types::Update;
use futures::task::AtomicWaker;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

/// Subscription identifier, unique within one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Which updates a subscriber wants, by `@type`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateFilter {
    kinds: Option<HashSet<String>>,
}

impl UpdateFilter {
    /// Every update.
    pub fn all() -> Self {
        Self { kinds: None }
    }

    /// Only updates whose `@type` is one of `kinds`.
    pub fn kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: Some(kinds.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, kind: &str) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(kind))
    }
}

/// One update as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub update: Arc<Update>,
    /// Updates this subscriber lost to overflow since its previous delivery.
    pub dropped_before: u64,
}

/// Why `try_recv` returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

#[derive(Default)]
struct QueueState {
    buffer: VecDeque<Arc<Update>>,
    unreported_drops: u64,
    closed: bool,
}

/// Bounded per-subscriber queue. Pushing never blocks; a full queue sheds
/// its oldest entry.
pub(crate) struct SubscriberQueue {
    state: Mutex<QueueState>,
    waker: AtomicWaker,
    dropped: AtomicU64,
    capacity: usize,
}

impl SubscriberQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            waker: AtomicWaker::new(),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    /// Enqueue `update`; returns true if an older update had to be dropped.
    pub(crate) fn push(&self, update: Arc<Update>) -> bool {
        let overflowed = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            let overflowed = state.buffer.len() >= self.capacity;
            if overflowed {
                state.buffer.pop_front();
                state.unreported_drops += 1;
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            state.buffer.push_back(update);
            overflowed
        };
        self.waker.wake();
        overflowed
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.waker.wake();
    }

    fn pop(&self) -> Result<Delivery, TryRecvError> {
        let mut state = self.state.lock();
        match state.buffer.pop_front() {
            Some(update) => Ok(Delivery {
                update,
                dropped_before: std::mem::take(&mut state.unreported_drops),
            }),
            None if state.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }
}

/// A registered interest in push updates.
///
/// Yields updates in the order the engine produced them. Dropping the
/// subscription unsubscribes it. Once the dispatcher closes (or the
/// subscription is removed) the remaining queue drains and then `recv`
/// returns `None`.
pub struct Subscription {
    id: SubscriptionId,
    queue: Arc<SubscriberQueue>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        queue: Arc<SubscriberQueue>,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            id,
            queue,
            registry,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next update.
    pub async fn recv(&mut self) -> Option<Delivery> {
        futures::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    pub fn try_recv(&mut self) -> Result<Delivery, TryRecvError> {
        self.queue.pop()
    }

    /// Total updates this subscriber lost to overflow.
    pub fn overflow_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Updates queued and not yet received.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        match self.queue.pop() {
            Ok(delivery) => return Poll::Ready(Some(delivery)),
            Err(TryRecvError::Closed) => return Poll::Ready(None),
            Err(TryRecvError::Empty) => {}
        }
        self.queue.waker.register(cx.waker());
        // Re-check after registering so a push in between is not missed.
        match self.queue.pop() {
            Ok(delivery) => Poll::Ready(Some(delivery)),
            Err(TryRecvError::Closed) => Poll::Ready(None),
            Err(TryRecvError::Empty) => Poll::Pending,
        }
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("queued", &self.queue.len())
            .field("overflow_count", &self.overflow_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn update(n: usize) -> Arc<Update> {
        Arc::new(Update::new(format!("update{n}"), Map::new()))
    }

    #[test]
    fn test_filter() {
        assert!(UpdateFilter::all().matches("updateOption"));

        let filter = UpdateFilter::kinds(["updateOption", "updateAuthorizationState"]);
        assert!(filter.matches("updateOption"));
        assert!(!filter.matches("updateNewMessage"));
    }

    #[test]
    fn test_queue_drops_oldest_on_overflow() {
        let queue = SubscriberQueue::new(3);
        for n in 0..5 {
            queue.push(update(n));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped.load(Ordering::Relaxed), 2);

        let first = queue.pop().unwrap();
        assert_eq!(first.update.kind(), "update2");
        assert_eq!(first.dropped_before, 2);

        let second = queue.pop().unwrap();
        assert_eq!(second.update.kind(), "update3");
        assert_eq!(second.dropped_before, 0);
    }

    #[test]
    fn test_closed_queue_drains_then_reports_closed() {
        let queue = SubscriberQueue::new(4);
        queue.push(update(0));
        queue.close();
        assert!(!queue.push(update(1)));

        assert!(queue.pop().is_ok());
        assert_eq!(queue.pop().unwrap_err(), TryRecvError::Closed);
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId(255).to_string(), "0xff");
    }
}
