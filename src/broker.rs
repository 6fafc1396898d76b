//! Topic-based publish/subscribe fan-out for run output.
//!
//! Every run owns one topic, keyed by its run id. Subscribers attach a
//! bounded delivery channel to the topic; dispatch walks the topic's
//! subscribers in subscription order and hands the event to each channel
//! before returning. A topic exists exactly as long as it has at least one
//! subscriber: it is created lazily on first subscribe and deleted when the
//! last subscriber leaves.
//!
//! The topic map sits behind an `RwLock`: dispatches to distinct topics run
//! concurrently under read guards, while subscribe/unsubscribe serialize
//! against in-flight dispatches. A subscriber that stops consuming
//! backpressures its own topic's dispatch but never another topic's.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};

/// Bounded per-subscriber channel depth. One slot keeps dispatch a hand-off
/// rather than a queue: a subscriber that never reads stalls the second
/// dispatch to its topic.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1;

/// One unit of observable run output: a single line of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    body: String,
}

impl Event {
    /// Wrap a line of output as an event.
    #[must_use]
    pub const fn new(body: String) -> Self {
        Self { body }
    }

    /// The event's line of text.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Consume the event, yielding its line of text.
    #[must_use]
    pub fn into_body(self) -> String {
        self.body
    }
}

/// Identifies one subscriber within a topic, for targeted unsubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

/// A live subscription: the receiving half of a topic's delivery channel
/// plus the id needed to unsubscribe it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    /// The subscriber id used for unsubscription.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next event, or `None` once the publishing side is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Split the subscription into its id and raw receiver.
    #[must_use]
    pub fn into_parts(self) -> (SubscriberId, mpsc::Receiver<Event>) {
        (self.id, self.receiver)
    }
}

/// A topic's delivery endpoint: the sending half of one subscriber channel.
#[derive(Debug)]
struct TopicSubscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Event>,
}

/// Fan-out broker mapping topics to ordered subscriber sets.
#[derive(Debug, Default)]
pub struct Broker {
    topics: RwLock<HashMap<String, Vec<TopicSubscriber>>>,
    next_subscriber_id: AtomicU64,
}

impl Broker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber to `topic`, creating the topic if absent.
    pub async fn subscribe(&self, topic: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::Relaxed));

        let mut topics = self.topics.write().await;
        topics
            .entry(String::from(topic))
            .or_default()
            .push(TopicSubscriber { id, sender });

        Subscription { id, receiver }
    }

    /// Remove exactly one matching subscriber from `topic`.
    ///
    /// Deletes the topic entry when its last subscriber leaves. Unknown
    /// topics and unknown subscriber ids are ignored; unsubscription is safe
    /// to call at any time and does not affect the publishing side.
    pub async fn unsubscribe(&self, topic: &str, id: SubscriberId) {
        let mut topics = self.topics.write().await;
        let Some(subscribers) = topics.get_mut(topic) else {
            return;
        };

        subscribers.retain(|subscriber| subscriber.id != id);
        if subscribers.is_empty() {
            topics.remove(topic);
        }
    }

    /// Deliver `event` to every current subscriber of `topic`, in
    /// subscription order.
    ///
    /// A dispatch to a topic with no subscribers is silently dropped, not
    /// queued. Delivery to a subscriber whose receiver has been dropped is
    /// skipped.
    pub async fn dispatch(&self, topic: &str, event: Event) {
        let topics = self.topics.read().await;
        let Some(subscribers) = topics.get(topic) else {
            return;
        };

        for subscriber in subscribers {
            if subscriber.sender.send(event.clone()).await.is_err() {
                tracing::debug!(topic, "subscriber receiver dropped, skipping delivery");
            }
        }
    }

    /// The number of live topics.
    #[must_use]
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    /// The number of subscribers attached to `topic`.
    #[must_use]
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map_or(0, Vec::len)
    }
}
