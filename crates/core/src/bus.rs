//! In-process publish/subscribe bus with named topics.
//!
//! Each subscription owns a bounded queue. `publish` never blocks: it offers
//! the message to every current subscriber of the topic and reports a
//! capacity error when a subscriber's queue is full. There is no replay and no
//! acknowledgement; a subscriber registered after a publish never sees it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Topic(&'static str);

impl Topic {
    /// Freshly admitted alerts, consumed by the notifier.
    pub const RAW_ALERT: Topic = Topic("raw-alert");
    /// Alerts already posted to chat, waiting for enrichment.
    pub const ENRICH: Topic = Topic("enrich");

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,
    #[error("subscriber queue for topic `{topic}` is full")]
    Full { topic: &'static str },
    #[error("no subscriber is registered on topic `{topic}`")]
    NoSubscribers { topic: &'static str },
    #[error("event bus subscriber registry is unavailable")]
    Unavailable,
}

/// Two-phase handler for one topic. `accept` runs on the consumer loop in
/// publish order and must not block; anything that has to happen in delivery
/// order (reserving a rate-limit slot, for instance) belongs there. The work it
/// returns is then finished by `complete`, concurrently with later messages.
/// Failures are the handler's own business; the bus neither retries nor
/// redelivers.
#[async_trait]
pub trait Subscriber<M>: Send + Sync {
    type Work: Send + 'static;

    /// Returning `None` ends handling of the message.
    fn accept(&self, message: M) -> Option<Self::Work>;

    async fn complete(&self, work: Self::Work);
}

struct BusInner<M> {
    capacity: usize,
    closed: AtomicBool,
    topics: RwLock<HashMap<Topic, Vec<mpsc::Sender<M>>>>,
}

pub struct EventBus<M> {
    inner: Arc<BusInner<M>>,
}

impl<M> Clone for EventBus<M> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<M> EventBus<M>
where
    M: Clone + Send + 'static,
{
    /// `capacity` bounds both the queued and the in-flight messages of every
    /// subscription.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Offers `message` to every current subscriber of `topic` and returns how
    /// many accepted it.
    pub fn publish(&self, topic: Topic, message: M) -> Result<usize, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let topics = self.inner.topics.read().map_err(|_| BusError::Unavailable)?;
        let Some(senders) = topics.get(&topic) else {
            debug!(topic = %topic, "publish on topic without subscribers");
            return Ok(0);
        };

        let mut delivered = 0;
        let mut saturated = false;
        for sender in senders {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => saturated = true,
                // Receiver dropped; pruned on the next subscribe.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        if saturated {
            warn!(topic = %topic, delivered, "subscriber queue full; publish rejected");
            return Err(BusError::Full { topic: topic.name() });
        }
        Ok(delivered)
    }

    pub fn subscribe(&self, topic: Topic) -> Result<Subscription<M>, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let mut topics = self.inner.topics.write().map_err(|_| BusError::Unavailable)?;
        let senders = topics.entry(topic).or_default();
        senders.retain(|existing| !existing.is_closed());
        senders.push(sender);

        Ok(Subscription { receiver })
    }

    /// Registers `subscriber` on `topic` and drives it from a dedicated
    /// consumer task. Messages are accepted one at a time in publish order;
    /// each accepted message is then completed on its own task so a slow
    /// invocation does not hold up the next one. At most `capacity`
    /// completions run at once. The returned handle finishes once the bus is
    /// closed and every in-flight completion has finished.
    pub fn spawn_subscriber<S>(&self, topic: Topic, subscriber: Arc<S>) -> Result<JoinHandle<()>, BusError>
    where
        S: Subscriber<M> + 'static,
    {
        let mut subscription = self.subscribe(topic)?;
        let in_flight = Arc::new(Semaphore::new(self.inner.capacity));

        Ok(tokio::spawn(async move {
            let mut handlers = JoinSet::new();

            while let Some(message) = subscription.recv().await {
                let Ok(permit) = Arc::clone(&in_flight).acquire_owned().await else {
                    break;
                };
                let Some(work) = subscriber.accept(message) else {
                    continue;
                };
                let subscriber = Arc::clone(&subscriber);
                handlers.spawn(async move {
                    subscriber.complete(work).await;
                    drop(permit);
                });

                while let Some(finished) = handlers.try_join_next() {
                    if let Err(error) = finished {
                        warn!(topic = %topic, error = %error, "subscriber invocation panicked");
                    }
                }
            }

            while let Some(finished) = handlers.join_next().await {
                if let Err(error) = finished {
                    warn!(topic = %topic, error = %error, "subscriber invocation panicked");
                }
            }
            debug!(topic = %topic, "subscriber loop finished");
        }))
    }

    /// Stops accepting publishes and subscriptions. Queued messages are still
    /// delivered; consumer loops end once their queues drain.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Ok(mut topics) = self.inner.topics.write() {
            topics.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .topics
            .read()
            .map(|topics| {
                topics
                    .get(&topic)
                    .map(|senders| senders.iter().filter(|sender| !sender.is_closed()).count())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

pub struct Subscription<M> {
    receiver: mpsc::Receiver<M>,
}

impl<M> Subscription<M> {
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<M> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{BusError, EventBus, Subscriber, Topic};

    const OTHER: Topic = Topic::new("other");

    #[tokio::test]
    async fn publish_reaches_every_subscriber_of_the_topic() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe(Topic::RAW_ALERT).expect("subscribe");
        let mut second = bus.subscribe(Topic::RAW_ALERT).expect("subscribe");

        let delivered = bus.publish(Topic::RAW_ALERT, "alert-1".to_owned()).expect("publish");

        assert_eq!(delivered, 2);
        assert_eq!(first.recv().await.as_deref(), Some("alert-1"));
        assert_eq!(second.recv().await.as_deref(), Some("alert-1"));
    }

    #[tokio::test]
    async fn subscriber_never_observes_other_topics() {
        let bus = EventBus::new(8);
        let mut enrich = bus.subscribe(Topic::ENRICH).expect("subscribe");

        bus.publish(Topic::RAW_ALERT, 1_u32).expect("publish raw");
        bus.publish(OTHER, 2_u32).expect("publish other");
        bus.publish(Topic::ENRICH, 3_u32).expect("publish enrich");

        assert_eq!(enrich.recv().await, Some(3));
        assert_eq!(enrich.try_recv(), None);
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_replay() {
        let bus = EventBus::new(8);
        assert_eq!(bus.publish(Topic::RAW_ALERT, 1_u32), Ok(0));

        let mut late = bus.subscribe(Topic::RAW_ALERT).expect("subscribe");
        assert_eq!(late.try_recv(), None);
    }

    #[tokio::test]
    async fn delivery_preserves_publish_order() {
        let bus = EventBus::new(16);
        let mut subscription = bus.subscribe(Topic::RAW_ALERT).expect("subscribe");

        for value in 0..10_u32 {
            bus.publish(Topic::RAW_ALERT, value).expect("publish");
        }

        let mut received = Vec::new();
        while let Some(value) = subscription.try_recv() {
            received.push(value);
        }
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn full_queue_is_reported_as_capacity_error() {
        let bus = EventBus::new(1);
        let _subscription = bus.subscribe(Topic::RAW_ALERT).expect("subscribe");

        bus.publish(Topic::RAW_ALERT, 1_u32).expect("first publish fits");
        let error = bus.publish(Topic::RAW_ALERT, 2_u32).unwrap_err();

        assert_eq!(error, BusError::Full { topic: "raw-alert" });
    }

    #[tokio::test]
    async fn closed_bus_rejects_publish_and_ends_subscriptions() {
        let bus = EventBus::new(4);
        let mut subscription = bus.subscribe(Topic::RAW_ALERT).expect("subscribe");
        bus.publish(Topic::RAW_ALERT, 7_u32).expect("publish");

        bus.close();

        assert_eq!(bus.publish(Topic::RAW_ALERT, 8_u32), Err(BusError::Closed));
        assert!(bus.subscribe(Topic::RAW_ALERT).is_err());
        assert_eq!(subscription.recv().await, Some(7));
        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_not_counted() {
        let bus = EventBus::<u32>::new(4);
        let kept = bus.subscribe(Topic::ENRICH).expect("subscribe");
        drop(bus.subscribe(Topic::ENRICH).expect("subscribe"));

        assert_eq!(bus.subscriber_count(Topic::ENRICH), 1);
        assert_eq!(bus.publish(Topic::ENRICH, 1), Ok(1));
        drop(kept);
    }

    struct Recorder {
        accepted: Mutex<Vec<u32>>,
        done: mpsc::UnboundedSender<u32>,
    }

    impl Recorder {
        fn new(done: mpsc::UnboundedSender<u32>) -> Arc<Self> {
            Arc::new(Self { accepted: Mutex::new(Vec::new()), done })
        }

        fn accepted(&self) -> Vec<u32> {
            self.accepted.lock().expect("recorder lock").clone()
        }
    }

    #[async_trait]
    impl Subscriber<u32> for Recorder {
        type Work = u32;

        fn accept(&self, message: u32) -> Option<u32> {
            self.accepted.lock().expect("recorder lock").push(message);
            (message % 2 == 0).then_some(message)
        }

        async fn complete(&self, work: u32) {
            tokio::task::yield_now().await;
            let _ = self.done.send(work);
        }
    }

    #[tokio::test]
    async fn spawned_subscriber_handles_each_message_and_stops_on_close() {
        let bus = EventBus::new(4);
        let (done, mut finished) = mpsc::unbounded_channel();
        let recorder = Recorder::new(done);

        let handle = bus.spawn_subscriber(Topic::RAW_ALERT, Arc::clone(&recorder)).expect("spawn");
        for value in [10_u32, 15, 20] {
            bus.publish(Topic::RAW_ALERT, value).expect("publish");
        }
        let mut completed = Vec::new();
        for _ in 0..2 {
            let value = tokio::time::timeout(Duration::from_secs(1), finished.recv())
                .await
                .expect("handler should run")
                .expect("channel open");
            completed.push(value);
        }

        bus.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer loop should stop")
            .expect("consumer loop should not panic");

        completed.sort_unstable();
        assert_eq!(completed, vec![10, 20]);
        assert_eq!(recorder.accepted(), vec![10, 15, 20]);
        assert!(finished.try_recv().is_err(), "rejected message must not complete");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn accept_runs_in_publish_order_on_a_multi_thread_runtime() {
        for _ in 0..20 {
            let bus = EventBus::new(256);
            let (done, mut finished) = mpsc::unbounded_channel();
            let recorder = Recorder::new(done);
            let handle = bus.spawn_subscriber(Topic::ENRICH, Arc::clone(&recorder)).expect("spawn");

            for value in 0..200_u32 {
                bus.publish(Topic::ENRICH, value).expect("publish");
            }
            for _ in 0..100 {
                tokio::time::timeout(Duration::from_secs(5), finished.recv())
                    .await
                    .expect("completion should run")
                    .expect("channel open");
            }

            bus.close();
            handle.await.expect("consumer loop should not panic");
            assert_eq!(recorder.accepted(), (0..200).collect::<Vec<_>>());
        }
    }
}
