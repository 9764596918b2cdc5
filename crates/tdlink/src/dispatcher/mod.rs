//! Update dispatcher: fans engine push updates out to subscribers.
//!
//! Each subscriber owns a bounded queue, so one slow consumer never holds up
//! the receive loop or any other subscriber. `publish` never waits.

mod subscription;

pub use subscription::{Delivery, Subscription, SubscriptionId, TryRecvError, UpdateFilter};

use crate::domain::error::{ClientError, ClientResult};
use crate::domain::types::Update;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use subscription::SubscriberQueue;
use tracing::{debug, trace};

struct Subscriber {
    filter: UpdateFilter,
    queue: Arc<SubscriberQueue>,
}

/// Statistics for the update dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub total_published: AtomicU64,
    /// Sum over subscribers of updates enqueued
    pub total_delivered: AtomicU64,
    /// Updates shed from full subscriber queues
    pub total_dropped: AtomicU64,
}

pub(crate) struct Registry {
    subscribers: DashMap<SubscriptionId, Subscriber>,
    active: AtomicUsize,
    id_counter: AtomicU64,
    closed: AtomicBool,
}

impl Registry {
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, subscriber)) => {
                subscriber.queue.close();
                self.active.fetch_sub(1, Ordering::AcqRel);
                debug!(subscription_id = %id, "Removed subscription");
                true
            }
            None => false,
        }
    }
}

/// Per-handle update dispatcher.
pub struct UpdateDispatcher {
    registry: Arc<Registry>,
    queue_capacity: usize,
    max_subscriptions: usize,
    stats: DispatcherStats,
}

impl UpdateDispatcher {
    pub fn new(queue_capacity: usize, max_subscriptions: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: DashMap::new(),
                active: AtomicUsize::new(0),
                id_counter: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
            queue_capacity,
            max_subscriptions,
            stats: DispatcherStats::default(),
        }
    }

    /// Register a subscriber for updates matching `filter`.
    pub fn subscribe(&self, filter: UpdateFilter) -> ClientResult<Subscription> {
        if self.registry.closed.load(Ordering::Acquire) {
            return Err(ClientError::HandleClosed);
        }

        let max = self.max_subscriptions;
        self.registry
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|_| ClientError::TooManySubscriptions { limit: max })?;

        let id = SubscriptionId(self.registry.id_counter.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(SubscriberQueue::new(self.queue_capacity));
        self.registry.subscribers.insert(
            id,
            Subscriber {
                filter: filter.clone(),
                queue: Arc::clone(&queue),
            },
        );

        // close() may have drained the map between the check and the insert.
        if self.registry.closed.load(Ordering::Acquire) {
            self.registry.remove(id);
            return Err(ClientError::HandleClosed);
        }

        debug!(subscription_id = %id, filter = ?filter, "Created subscription");
        Ok(Subscription::new(id, queue, Arc::downgrade(&self.registry)))
    }

    /// Remove a subscription. Its `Subscription` drains and then ends.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.remove(id)
    }

    /// Offer `update` to every matching subscriber.
    ///
    /// Returns the number of subscribers it was enqueued for.
    pub fn publish(&self, update: Update) -> usize {
        if self.registry.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);

        let update = Arc::new(update);
        let mut delivered = 0;
        for entry in self.registry.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.filter.matches(update.kind()) {
                continue;
            }
            if subscriber.queue.push(Arc::clone(&update)) {
                self.stats.total_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(
                    subscription_id = %entry.key(),
                    kind = update.kind(),
                    "Subscriber queue full, dropped oldest update"
                );
            }
            delivered += 1;
        }
        self.stats
            .total_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Stop accepting updates and end every subscription.
    pub fn close(&self) {
        if self.registry.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let ids: Vec<SubscriptionId> = self
            .registry
            .subscribers
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            self.registry.remove(id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.registry.closed.load(Ordering::Acquire)
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.subscribers.len()
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn update(kind: &str, n: i64) -> Update {
        let Value::Object(map) = json!({ "n": n }) else {
            unreachable!()
        };
        Update::new(kind, map)
    }

    #[tokio::test]
    async fn test_publish_in_order() {
        let dispatcher = UpdateDispatcher::new(16, 4);
        let mut sub = dispatcher.subscribe(UpdateFilter::all()).unwrap();

        for n in 0..5 {
            assert_eq!(dispatcher.publish(update("updateOption", n)), 1);
        }
        for n in 0..5 {
            let delivery = sub.recv().await.unwrap();
            assert_eq!(delivery.update.get("n"), Some(&json!(n)));
            assert_eq!(delivery.dropped_before, 0);
        }
    }

    #[tokio::test]
    async fn test_filter_by_kind() {
        let dispatcher = UpdateDispatcher::new(16, 4);
        let mut options = dispatcher
            .subscribe(UpdateFilter::kinds(["updateOption"]))
            .unwrap();
        let everything = dispatcher.subscribe(UpdateFilter::all()).unwrap();

        dispatcher.publish(update("updateAuthorizationState", 0));
        dispatcher.publish(update("updateOption", 1));

        assert_eq!(options.recv().await.unwrap().update.kind(), "updateOption");
        assert_eq!(options.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(everything.queued(), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_fast_one() {
        let dispatcher = UpdateDispatcher::new(4, 4);
        let slow = dispatcher.subscribe(UpdateFilter::all()).unwrap();
        let mut fast = dispatcher.subscribe(UpdateFilter::all()).unwrap();

        for n in 0..100 {
            dispatcher.publish(update("updateOption", n));
            let delivery = fast.recv().await.unwrap();
            assert_eq!(delivery.update.get("n"), Some(&json!(n)));
        }

        assert_eq!(fast.overflow_count(), 0);
        assert_eq!(slow.overflow_count(), 96);
        assert_eq!(slow.queued(), 4);
        assert_eq!(dispatcher.stats().total_dropped.load(Ordering::Relaxed), 96);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let dispatcher = Arc::new(UpdateDispatcher::new(16, 4));
        let mut sub = dispatcher.subscribe(UpdateFilter::all()).unwrap();

        let publisher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(update("updateOption", 7));
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.update.get("n"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_subscription_limit() {
        let dispatcher = UpdateDispatcher::new(16, 2);
        let _a = dispatcher.subscribe(UpdateFilter::all()).unwrap();
        let b = dispatcher.subscribe(UpdateFilter::all()).unwrap();

        assert!(matches!(
            dispatcher.subscribe(UpdateFilter::all()),
            Err(ClientError::TooManySubscriptions { limit: 2 })
        ));

        drop(b);
        assert_eq!(dispatcher.subscription_count(), 1);
        assert!(dispatcher.subscribe(UpdateFilter::all()).is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let dispatcher = UpdateDispatcher::new(16, 4);
        let mut sub = dispatcher.subscribe(UpdateFilter::all()).unwrap();
        dispatcher.publish(update("updateOption", 1));

        assert!(dispatcher.unsubscribe(sub.id()));
        assert!(!dispatcher.unsubscribe(sub.id()));
        assert_eq!(dispatcher.publish(update("updateOption", 2)), 0);

        assert!(sub.next().await.is_some());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_ends_all_subscriptions() {
        let dispatcher = UpdateDispatcher::new(16, 4);
        let mut a = dispatcher.subscribe(UpdateFilter::all()).unwrap();
        let mut b = dispatcher.subscribe(UpdateFilter::all()).unwrap();

        dispatcher.close();
        assert!(dispatcher.is_closed());
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert!(matches!(
            dispatcher.subscribe(UpdateFilter::all()),
            Err(ClientError::HandleClosed)
        ));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let dispatcher = UpdateDispatcher::new(16, 4);
        assert_eq!(dispatcher.publish(update("updateOption", 0)), 0);
        assert_eq!(dispatcher.stats().total_published.load(Ordering::Relaxed), 1);
    }
}
