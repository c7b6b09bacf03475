//! In-process broker used by tests and the demo binary.
//!
//! Each (topic, subscription) pair owns a FIFO of ready messages and a set of
//! messages handed out but not yet acknowledged. Redelivery is explicit: call
//! [`MemorySubscription::redeliver_unacknowledged`] where a real broker would
//! run its ack timeout.

use crate::{
    Connector, Message, MessageId, MessageSource, Properties, SourceError, SubscribeOptions,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

pub struct MemorySubscription {
    topic: String,
    name: String,
    ready: Mutex<VecDeque<Message>>,
    unacked: DashMap<MessageId, Message>,
    next_entry: AtomicI64,
    /// Highest entry id handed to a receiver, -1 before the first receive
    delivered: AtomicI64,
    closed: AtomicBool,
    notify: Notify,
}

impl MemorySubscription {
    pub fn new(topic: impl Into<String>, name: impl Into<String>) -> Self {
        MemorySubscription {
            topic: topic.into(),
            name: name.into(),
            ready: Mutex::new(VecDeque::new()),
            unacked: DashMap::new(),
            next_entry: AtomicI64::new(0),
            delivered: AtomicI64::new(-1),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message to the subscription and wake one receiver
    pub fn publish(&self, payload: impl Into<Bytes>, properties: Properties) -> MessageId {
        let entry_id = self.next_entry.fetch_add(1, Ordering::SeqCst);
        let id = MessageId::new(0, entry_id, 0, -1);
        let message = Message::new(id, self.topic.clone(), payload).with_properties(properties);

        self.ready.lock().push_back(message);
        self.notify.notify_one();
        id
    }

    /// Number of messages waiting to be received
    pub fn pending(&self) -> usize {
        self.ready.lock().len()
    }

    /// Number of messages received but not yet acknowledged
    pub fn unacknowledged(&self) -> usize {
        self.unacked.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Put every unacknowledged message back at the head of the queue.
    ///
    /// Returns the number of messages requeued.
    pub fn redeliver_unacknowledged(&self) -> usize {
        let ids: Vec<MessageId> = self.unacked.iter().map(|entry| *entry.key()).collect();
        let mut requeued: Vec<Message> = ids
            .into_iter()
            .filter_map(|id| self.unacked.remove(&id))
            .map(|(_, msg)| {
                let count = msg.redelivery_count() + 1;
                msg.with_redelivery_count(count)
            })
            .collect();
        requeued.sort_by_key(|msg| msg.id().entry_id);

        let count = requeued.len();
        {
            let mut ready = self.ready.lock();
            for msg in requeued.into_iter().rev() {
                ready.push_front(msg);
            }
        }
        for _ in 0..count {
            self.notify.notify_one();
        }

        debug!(subscription = %self.name, count, "Redelivering unacknowledged messages");
        count
    }

    /// Reopen a closed subscription, handing outstanding messages to the new consumer
    fn reopen(&self) {
        if self.closed.swap(false, Ordering::SeqCst) {
            self.redeliver_unacknowledged();
        }
    }
}

#[async_trait]
impl MessageSource for MemorySubscription {
    async fn receive(&self) -> Result<Message, SourceError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(SourceError::Closed);
            }

            let next = self.ready.lock().pop_front();
            if let Some(msg) = next {
                self.unacked.insert(msg.id(), msg.clone());
                self.delivered.fetch_max(msg.id().entry_id, Ordering::SeqCst);
                return Ok(msg);
            }

            notified.await;
        }
    }

    async fn acknowledge(&self, message: &Message) -> Result<(), SourceError> {
        let id = message.id();
        if self.unacked.remove(&id).is_some() {
            return Ok(());
        }

        // A repeated ack of a delivered message is a no-op. Ids still waiting
        // in the queue were never handed out and cannot be acked yet.
        let delivered = id.entry_id <= self.delivered.load(Ordering::SeqCst);
        let queued = self.ready.lock().iter().any(|msg| msg.id() == id);
        if delivered && !queued {
            Ok(())
        } else {
            Err(SourceError::UnknownMessage(id))
        }
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Registry of in-memory subscriptions, keyed by topic and subscription name
#[derive(Default)]
pub struct MemoryBroker {
    subscriptions: DashMap<(String, String), Arc<MemorySubscription>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the subscription for `topic` / `name`
    pub fn subscription(&self, topic: &str, name: &str) -> Arc<MemorySubscription> {
        self.subscriptions
            .entry((topic.to_string(), name.to_string()))
            .or_insert_with(|| Arc::new(MemorySubscription::new(topic, name)))
            .clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Result<Arc<dyn MessageSource>, SourceError> {
        let subscription = self.subscription(&options.topic, &options.subscription);
        subscription.reopen();

        debug!(
            topic = %options.topic,
            subscription = %options.subscription,
            subscription_type = ?options.subscription_type,
            "Subscribed to in-memory topic"
        );

        Ok(subscription as Arc<dyn MessageSource>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SubscriptionType;
    use std::time::Duration;

    fn options(topic: &str, subscription: &str) -> SubscribeOptions {
        SubscribeOptions {
            service_url: "memory://local".to_string(),
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            subscription_type: SubscriptionType::Failover,
            allow_insecure_tls: false,
        }
    }

    #[tokio::test]
    async fn test_publish_receive_ack() {
        let sub = MemorySubscription::new("persistent://t/ns/a", "t-sub");
        let id = sub.publish(&b"one"[..], Properties::new());
        assert_eq!(id.to_string(), "0:0:0:-1");
        assert_eq!(sub.pending(), 1);

        let msg = sub.receive().await.unwrap();
        assert_eq!(msg.payload(), b"one");
        assert_eq!(sub.pending(), 0);
        assert_eq!(sub.unacknowledged(), 1);

        sub.acknowledge(&msg).await.unwrap();
        assert_eq!(sub.unacknowledged(), 0);

        // Second ack of the same message is a no-op
        sub.acknowledge(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_unknown_message() {
        let sub = MemorySubscription::new("t", "s");
        let stranger = Message::new(MessageId::new(0, 99, 0, -1), "t", &b""[..]);
        assert_eq!(
            sub.acknowledge(&stranger).await,
            Err(SourceError::UnknownMessage(stranger.id()))
        );
    }

    #[tokio::test]
    async fn test_ack_before_receive_is_rejected() {
        let sub = MemorySubscription::new("t", "s");
        let first = sub.publish(&b"a"[..], Properties::new());
        let second = sub.publish(&b"b"[..], Properties::new());

        let early = Message::new(second, "t", &b"b"[..]);
        assert_eq!(
            sub.acknowledge(&early).await,
            Err(SourceError::UnknownMessage(second))
        );
        assert_eq!(sub.pending(), 2);

        let msg = sub.receive().await.unwrap();
        assert_eq!(msg.id(), first);
        sub.acknowledge(&msg).await.unwrap();
        // Second ack of the same message is accepted
        sub.acknowledge(&msg).await.unwrap();
        assert_eq!(
            sub.acknowledge(&early).await,
            Err(SourceError::UnknownMessage(second))
        );
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let sub = Arc::new(MemorySubscription::new("t", "s"));

        let receiver = {
            let sub = sub.clone();
            tokio::spawn(async move { sub.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!receiver.is_finished());

        sub.publish(&b"late"[..], Properties::new());
        let msg = receiver.await.unwrap().unwrap();
        assert_eq!(msg.payload(), b"late");
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_receivers() {
        let sub = Arc::new(MemorySubscription::new("t", "s"));

        let receiver = {
            let sub = sub.clone();
            tokio::spawn(async move { sub.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        sub.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(SourceError::Closed));
    }

    #[tokio::test]
    async fn test_redeliver_unacknowledged() {
        let sub = MemorySubscription::new("t", "s");
        sub.publish(&b"a"[..], Properties::new());
        sub.publish(&b"b"[..], Properties::new());

        let first = sub.receive().await.unwrap();
        let _second = sub.receive().await.unwrap();
        sub.acknowledge(&first).await.unwrap();

        assert_eq!(sub.redeliver_unacknowledged(), 1);
        let again = sub.receive().await.unwrap();
        assert_eq!(again.payload(), b"b");
        assert_eq!(again.redelivery_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_receivers_get_distinct_messages() {
        let sub = Arc::new(MemorySubscription::new("t", "s"));
        for i in 0..50 {
            sub.publish(format!("m{}", i).into_bytes(), Properties::new());
        }

        let mut handles = Vec::new();
        for _ in 0..5 {
            let sub = sub.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..10 {
                    ids.push(sub.receive().await.unwrap().id());
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_by_key(|id| id.entry_id);
        all.dedup();
        assert_eq!(all.len(), 50);
    }

    #[tokio::test]
    async fn test_broker_reuses_subscription() {
        let broker = MemoryBroker::new();
        let a = broker.subscription("t", "s");
        let b = broker.subscription("t", "s");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(broker.subscription_count(), 1);

        broker.subscription("t", "other");
        assert_eq!(broker.subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_resubscribe_after_close_redelivers() {
        let broker = MemoryBroker::new();
        let sub = broker.subscription("t", "s");
        sub.publish(&b"x"[..], Properties::new());

        let source = broker.subscribe(options("t", "s")).await.unwrap();
        let msg = source.receive().await.unwrap();
        source.close().await.unwrap();
        assert!(sub.is_closed());

        let source = broker.subscribe(options("t", "s")).await.unwrap();
        let again = source.receive().await.unwrap();
        assert_eq!(again.id(), msg.id());
        assert_eq!(again.redelivery_count(), 1);
    }
}
