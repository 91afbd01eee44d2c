//! Process-wide publish/subscribe channel for ingestion events.
//!
//! Every subscriber owns an unbounded queue, so `publish` never waits on a
//! slow consumer. Nothing is retained: a subscriber only sees what is
//! published after it subscribed.

use async_std::channel::{unbounded, Receiver, Sender};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tracing::trace;

/// Topic carrying one [`crate::model::IngestionEvent`] per processed message.
pub const NEW_EMAIL: &str = "new-email";

type Topics<T> = HashMap<String, Vec<(u64, Sender<T>)>>;

struct Inner<T> {
    topics: Mutex<Topics<T>>,
    next_id: AtomicU64,
}

impl<T> Inner<T> {
    fn topics(&self) -> MutexGuard<'_, Topics<T>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: &str, id: u64) -> bool {
        let mut topics = self.topics();
        let Some(subs) = topics.get_mut(topic) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(sub_id, _)| *sub_id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            topics.remove(topic);
        }
        removed
    }
}

/// Cheap to clone; all clones share the same subscriber table.
pub struct EventBus<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Delivers `payload` to every live subscriber of `topic` and returns how
    /// many received it. Subscribers whose stream was dropped are pruned.
    pub fn publish(&self, topic: &str, payload: T) -> usize {
        let mut topics = self.inner.topics();
        let Some(subs) = topics.get_mut(topic) else {
            trace!(topic, "publish with no subscribers");
            return 0;
        };
        subs.retain(|(_, tx)| tx.try_send(payload.clone()).is_ok());
        let delivered = subs.len();
        if subs.is_empty() {
            topics.remove(topic);
        }
        delivered
    }

    pub fn subscribe(&self, topic: &str) -> Subscription<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded();
        self.inner
            .topics()
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));
        Subscription {
            id,
            topic: topic.to_string(),
            rx: Box::pin(rx),
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Returns false when no such subscription was registered.
    pub fn unsubscribe(&self, topic: &str, id: u64) -> bool {
        self.inner.remove(topic, id)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics().get(topic).map_or(0, Vec::len)
    }
}

/// A stream of payloads published on one topic. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    topic: String,
    rx: Pin<Box<Receiver<T>>>,
    bus: Weak<Inner<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.as_mut().poll_next(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(&self.topic, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus: EventBus<u32> = EventBus::new();
        for _ in 0..5 {
            assert_eq!(bus.publish(NEW_EMAIL, 42), 0);
        }
        assert_eq!(bus.subscriber_count(NEW_EMAIL), 0);
    }

    #[async_std::test]
    async fn fans_out_to_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe(NEW_EMAIL);
        let mut b = bus.subscribe(NEW_EMAIL);
        let mut other = bus.subscribe("other");

        assert_eq!(bus.publish(NEW_EMAIL, "hello".to_string()), 2);
        assert_eq!(a.next().await.as_deref(), Some("hello"));
        assert_eq!(b.next().await.as_deref(), Some("hello"));

        bus.publish("other", "x".to_string());
        assert_eq!(other.next().await.as_deref(), Some("x"));
    }

    #[async_std::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(NEW_EMAIL, 1u8);
        let mut late = bus.subscribe(NEW_EMAIL);
        bus.publish(NEW_EMAIL, 2u8);
        assert_eq!(late.next().await, Some(2));
    }

    #[test]
    fn slow_subscriber_does_not_block_publisher() {
        let bus = EventBus::new();
        let _idle = bus.subscribe(NEW_EMAIL);
        for i in 0..10_000u32 {
            assert_eq!(bus.publish(NEW_EMAIL, i), 1);
        }
    }

    #[test]
    fn unsubscribe_and_drop_remove_subscribers() {
        let bus: EventBus<u8> = EventBus::new();
        let a = bus.subscribe(NEW_EMAIL);
        let b = bus.subscribe(NEW_EMAIL);
        assert_eq!(bus.subscriber_count(NEW_EMAIL), 2);

        assert!(bus.unsubscribe(NEW_EMAIL, a.id()));
        assert!(!bus.unsubscribe(NEW_EMAIL, a.id()));
        assert_eq!(bus.publish(NEW_EMAIL, 1), 1);

        drop(b);
        assert_eq!(bus.subscriber_count(NEW_EMAIL), 0);
        drop(a);
    }

    #[test]
    fn concurrent_publishers() {
        let bus: EventBus<usize> = EventBus::new();
        let sub = bus.subscribe(NEW_EMAIL);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        bus.publish(NEW_EMAIL, t * 100 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let received: Vec<usize> = async_std::task::block_on(sub.take(400).collect());
        assert_eq!(received.len(), 400);
    }
}
