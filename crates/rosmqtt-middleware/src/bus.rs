//! In-process, topic-based message bus carrying type-erased messages.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Topics are created on first use by either a publisher or a
//! subscriber, and a topic carries exactly one message type once a publisher
//! has advertised it.  A topic whose publishers are all gone may be
//! re-advertised with a different type.
//!
//! # Latching
//!
//! A publisher advertised with [`PublisherOptions::latched`] stores the last
//! message it published on the topic.  Subscribers that arrive later receive
//! that message first, the way a latched ROS topic behaves.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rosmqtt_types::{BridgeError, SerializedMessage, TypeIdentity, TypeRegistry};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::adapter::{
    GenericPublisher, MessageBus, MessageCallback, PublisherOptions, SubscriptionHandle,
};

struct TopicChannel {
    type_identity: Option<Arc<TypeIdentity>>,
    sender: broadcast::Sender<SerializedMessage>,
    latched: Option<SerializedMessage>,
    /// Live publishers.  A topic can only change type when this is zero.
    publishers: usize,
}

impl TopicChannel {
    fn new(queue_size: usize) -> Self {
        let (sender, _) = broadcast::channel(queue_size.max(1));
        Self {
            type_identity: None,
            sender,
            latched: None,
            publishers: 0,
        }
    }
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, TopicChannel>>,
    types: Mutex<TypeRegistry>,
}

/// Shared message bus.  Clone it cheaply – all clones share the same
/// topics.
#[derive(Clone, Default)]
pub struct RosBus {
    inner: Arc<BusInner>,
}

impl RosBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe and receive messages through an async receiver instead of a
    /// callback.  A latched message is yielded first.
    pub fn subscribe_receiver(&self, topic: &str, queue_size: usize) -> TopicReceiver {
        let mut topics = self.inner.topics.lock();
        let channel = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicChannel::new(queue_size));
        TopicReceiver {
            topic: topic.to_string(),
            pending: channel.latched.clone(),
            receiver: channel.sender.subscribe(),
        }
    }

    /// Names of all topics currently known to the bus.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.topics.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl MessageBus for RosBus {
    fn advertise(
        &self,
        topic: &str,
        type_identity: TypeIdentity,
        options: PublisherOptions,
    ) -> Result<Arc<dyn GenericPublisher>, BridgeError> {
        let type_identity = self.inner.types.lock().register(type_identity);

        let mut topics = self.inner.topics.lock();
        let channel = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicChannel::new(options.queue_size));

        match &channel.type_identity {
            Some(existing) if existing.same_type(&type_identity) => {}
            Some(existing) if channel.publishers > 0 => {
                return Err(BridgeError::Bus(format!(
                    "topic '{topic}' already carries '{}', cannot advertise '{}'",
                    existing.name, type_identity.name
                )));
            }
            _ => {
                channel.type_identity = Some(Arc::clone(&type_identity));
                channel.latched = None;
            }
        }
        channel.publishers += 1;

        debug!(topic, type_name = %type_identity.name, latched = options.latched, "advertised");
        Ok(Arc::new(RosPublisher {
            topic: topic.to_string(),
            type_identity,
            latched: options.latched,
            sender: channel.sender.clone(),
            bus: Arc::clone(&self.inner),
        }))
    }

    fn subscribe(
        &self,
        topic: &str,
        queue_size: usize,
        callback: MessageCallback,
    ) -> Result<SubscriptionHandle, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            BridgeError::Bus(format!("subscribing to '{topic}' requires a Tokio runtime: {e}"))
        })?;

        let mut receiver = self.subscribe_receiver(topic, queue_size);
        let task = runtime.spawn(async move {
            while let Some(message) = receiver.recv().await {
                callback(message);
            }
        });
        let abort = task.abort_handle();
        Ok(SubscriptionHandle::new(topic, move || abort.abort()))
    }

    fn topic_type(&self, topic: &str) -> Option<Arc<TypeIdentity>> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|channel| channel.type_identity.clone())
    }

    fn resolve_type(&self, md5: &str) -> Option<Arc<TypeIdentity>> {
        self.inner.types.lock().resolve(md5)
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

struct RosPublisher {
    topic: String,
    type_identity: Arc<TypeIdentity>,
    latched: bool,
    sender: broadcast::Sender<SerializedMessage>,
    bus: Arc<BusInner>,
}

impl GenericPublisher for RosPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn type_identity(&self) -> &Arc<TypeIdentity> {
        &self.type_identity
    }

    fn publish(&self, data: Vec<u8>) -> Result<usize, BridgeError> {
        let message = SerializedMessage::new(Arc::clone(&self.type_identity), data);
        if self.latched {
            // Store and send under the lock so a concurrent subscriber sees
            // the message exactly once.
            let mut topics = self.bus.topics.lock();
            if let Some(channel) = topics.get_mut(&self.topic) {
                channel.latched = Some(message.clone());
            }
            return Ok(self.sender.send(message).unwrap_or(0));
        }
        // No receivers is a normal condition on a bus.
        Ok(self.sender.send(message).unwrap_or(0))
    }
}

impl Drop for RosPublisher {
    fn drop(&mut self) {
        if let Some(channel) = self.bus.topics.lock().get_mut(&self.topic) {
            channel.publishers = channel.publishers.saturating_sub(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single topic.
///
/// Obtained via [`RosBus::subscribe_receiver`].
pub struct TopicReceiver {
    topic: String,
    pending: Option<SerializedMessage>,
    receiver: broadcast::Receiver<SerializedMessage>,
}

impl TopicReceiver {
    /// Wait for the next message on this topic.
    ///
    /// Returns `None` when the bus has shut down.  A subscriber that fell
    /// behind skips the dropped messages and keeps going.
    pub async fn recv(&mut self) -> Option<SerializedMessage> {
        if let Some(message) = self.pending.take() {
            return Some(message);
        }
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicReceiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`TopicReceiver::recv`].
    pub fn try_recv(&mut self) -> Option<SerializedMessage> {
        if let Some(message) = self.pending.take() {
            return Some(message);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicReceiver lagged");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosmqtt_types::{Float64, RosMessage};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn sensor_type() -> TypeIdentity {
        TypeIdentity::new("sensor_msgs/msg/Range", "c005c34273dc426c67a020a87bc24148")
    }

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = RosBus::new();
        let mut rx = bus.subscribe_receiver("/range", 10);
        let publisher = bus.advertise("/range", sensor_type(), PublisherOptions::default())?;

        assert_eq!(publisher.publish(vec![1, 2, 3])?, 1);

        let received = rx.recv().await.ok_or("no message")?;
        assert_eq!(received.data, vec![1, 2, 3]);
        assert_eq!(received.type_identity.name, "sensor_msgs/msg/Range");
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = RosBus::new();
        let publisher = bus
            .advertise("/range", sensor_type(), PublisherOptions::default())
            .unwrap();
        assert_eq!(publisher.publish(vec![0]).unwrap(), 0);
    }

    #[test]
    fn advertise_conflicting_type_is_rejected() {
        let bus = RosBus::new();
        let _live = bus
            .advertise("/range", sensor_type(), PublisherOptions::default())
            .unwrap();
        let err = bus
            .advertise("/range", TypeIdentity::of::<Float64>(), PublisherOptions::default())
            .err()
            .expect("conflicting type must fail");
        assert!(matches!(err, BridgeError::Bus(_)));
    }

    #[test]
    fn topic_can_be_retyped_once_publishers_are_gone() {
        let bus = RosBus::new();
        let first = bus
            .advertise("/range", sensor_type(), PublisherOptions::default())
            .unwrap();
        drop(first);
        let second = bus
            .advertise("/range", TypeIdentity::of::<Float64>(), PublisherOptions::default())
            .unwrap();
        assert_eq!(second.type_identity().name, Float64::TYPE_NAME);
        assert_eq!(bus.topic_type("/range").unwrap().name, Float64::TYPE_NAME);
    }

    #[test]
    fn topic_type_reflects_advertised_type() {
        let bus = RosBus::new();
        assert!(bus.topic_type("/range").is_none());
        let _rx = bus.subscribe_receiver("/range", 1);
        assert!(bus.topic_type("/range").is_none(), "subscribers do not type a topic");

        bus.advertise("/range", sensor_type(), PublisherOptions::default())
            .unwrap();
        assert_eq!(bus.topic_type("/range").unwrap().md5, sensor_type().md5);
        assert_eq!(bus.topic_names(), vec!["/range".to_string()]);
    }

    #[test]
    fn resolve_type_finds_advertised_definition() {
        let bus = RosBus::new();
        bus.advertise("/latency", TypeIdentity::of::<Float64>(), PublisherOptions::default())
            .unwrap();
        let found = bus.resolve_type(Float64::MD5SUM).unwrap();
        assert_eq!(found.definition.as_deref(), Some(Float64::DEFINITION));
    }

    #[tokio::test]
    async fn latched_message_replayed_to_late_subscriber() {
        let bus = RosBus::new();
        let publisher = bus
            .advertise(
                "/map",
                sensor_type(),
                PublisherOptions { queue_size: 1, latched: true },
            )
            .unwrap();
        publisher.publish(vec![42]).unwrap();

        let mut late = bus.subscribe_receiver("/map", 1);
        let received = late.recv().await.unwrap();
        assert_eq!(received.data, vec![42]);
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn callback_subscription_delivers_until_dropped() {
        let bus = RosBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = bus
            .subscribe(
                "/range",
                10,
                Box::new(move |message| {
                    let _ = tx.send(message.data);
                }),
            )
            .unwrap();
        let publisher = bus
            .advertise("/range", sensor_type(), PublisherOptions::default())
            .unwrap();

        // The subscription task must be running before anything is sent.
        tokio::task::yield_now().await;
        publisher.publish(vec![7]).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(vec![7]));

        drop(handle);
        tokio::task::yield_now().await;
        publisher.publish(vec![8]).unwrap();
        let after = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(
            !matches!(after, Ok(Some(_))),
            "dropped subscription must not deliver"
        );
    }

    #[test]
    fn subscribe_outside_runtime_fails() {
        let bus = RosBus::new();
        let result = bus.subscribe("/range", 1, Box::new(|_| {}));
        assert!(matches!(result, Err(BridgeError::Bus(_))));
    }

    #[tokio::test]
    async fn slow_receiver_skips_lagged_messages() {
        let bus = RosBus::new();
        let mut slow = bus.subscribe_receiver("/flood", 4);
        let publisher = bus
            .advertise("/flood", sensor_type(), PublisherOptions { queue_size: 4, latched: false })
            .unwrap();
        for i in 0..100u8 {
            publisher.publish(vec![i]).unwrap();
        }
        let first = slow.recv().await.unwrap();
        assert!(first.data[0] >= 96, "oldest messages are dropped, got {}", first.data[0]);
    }
}
