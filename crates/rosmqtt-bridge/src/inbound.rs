//! Broker → bus forwarding.
//!
//! A route's bus publisher cannot exist before the route's type metadata
//! arrives, since the bridge has no other way to learn the type.  Payloads
//! received before that are dropped.

use rosmqtt_middleware::PublisherOptions;
use rosmqtt_types::{BridgeError, Float64, RosMessage, Stamp, TypeIdentity};
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::envelope;
use crate::routes::{InboundRoute, PublisherChange};
use crate::type_info::{TypeInfo, described_topic};

/// Bus topic carrying the latency of messages bridged onto `ros_topic`.
///
/// `/<node_name>/latencies/<ros_topic>` with the leading slash of
/// `ros_topic` removed.
pub fn latency_topic(node_name: &str, ros_topic: &str) -> String {
    format!(
        "/{}/latencies/{}",
        node_name.trim_matches('/'),
        ros_topic.trim_start_matches('/')
    )
}

impl Bridge {
    /// Dispatch an MQTT message to metadata or payload handling.
    pub fn handle_mqtt_message(&self, topic: &str, payload: &[u8]) {
        match described_topic(topic) {
            Some(mqtt_topic) => self.handle_type_info(mqtt_topic, payload),
            None => self.handle_payload(topic, payload),
        }
    }

    fn handle_type_info(&self, mqtt_topic: &str, bytes: &[u8]) {
        let Some(route) = self.mqtt2ros.get(mqtt_topic) else {
            let e = BridgeError::UnknownRoute(mqtt_topic.to_string());
            error!(error = %e, "ignoring type metadata");
            return;
        };
        let info = match TypeInfo::decode(bytes) {
            Ok(info) => info,
            Err(e) => {
                warn!(mqtt_topic, error = %e, "ignoring malformed type metadata");
                return;
            }
        };

        let mut identity = info.identity();
        if identity.definition.is_none()
            && let Some(known) = self.bus.resolve_type(&identity.md5)
            && known.name == identity.name
        {
            identity.definition = known.definition.clone();
        }

        let ros_topic = &route.config.ros_topic;
        let options = PublisherOptions {
            queue_size: route.config.queue_size,
            latched: route.config.latched,
        };
        let (type_name, md5) = (info.name.as_str(), info.md5.as_str());
        match route.configure_publisher(identity, info.stamped, |identity| {
            self.bus.advertise(ros_topic, identity, options)
        }) {
            Ok(PublisherChange::Unchanged) => {
                debug!(mqtt_topic, type_name, "type metadata unchanged");
            }
            Ok(PublisherChange::Created) => info!(
                mqtt_topic,
                %ros_topic,
                type_name,
                md5,
                latched = options.latched,
                "created ROS publisher"
            ),
            Ok(PublisherChange::Replaced) => info!(
                mqtt_topic,
                %ros_topic,
                type_name,
                md5,
                "type changed, re-created ROS publisher"
            ),
            Err(e) => error!(mqtt_topic, %ros_topic, error = %e, "failed to create ROS publisher"),
        }
    }

    fn handle_payload(&self, mqtt_topic: &str, bytes: &[u8]) {
        let Some(route) = self.mqtt2ros.get(mqtt_topic) else {
            let e = BridgeError::UnknownRoute(mqtt_topic.to_string());
            error!(error = %e, "dropping MQTT message");
            return;
        };
        let Some(publisher) = route.publisher() else {
            warn!(mqtt_topic, "type metadata not received yet, dropping message");
            return;
        };

        let envelope = match envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(mqtt_topic, error = %e, "dropping malformed message");
                return;
            }
        };
        let received = self.clock.now();

        match publisher.publish(envelope.payload.to_vec()) {
            Ok(subscribers) => debug!(
                mqtt_topic,
                ros_topic = %route.config.ros_topic,
                subscribers,
                "forwarded MQTT message to ROS"
            ),
            Err(e) => {
                error!(mqtt_topic, error = %e, "failed to publish ROS message");
                return;
            }
        }

        if let Some(sent) = envelope.stamp {
            self.publish_latency(route, sent, received);
        }
    }

    fn publish_latency(&self, route: &InboundRoute, sent: Stamp, received: Stamp) {
        // Clocks on both ends may disagree, so negative values are kept.
        let latency = received.seconds_since(sent);
        let publisher = match route.latency_publisher_or_create(|| {
            self.bus.advertise(
                &route.latency_topic,
                TypeIdentity::of::<Float64>(),
                PublisherOptions {
                    queue_size: route.config.queue_size,
                    latched: false,
                },
            )
        }) {
            Ok(publisher) => publisher,
            Err(e) => {
                error!(topic = %route.latency_topic, error = %e, "failed to create latency publisher");
                return;
            }
        };
        if let Err(e) = publisher.publish(Float64 { data: latency }.to_cdr()) {
            error!(topic = %route.latency_topic, error = %e, "failed to publish latency");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rosmqtt_middleware::{MessageBus, RosBus};
    use rosmqtt_types::SerializedMessage;

    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{RecordingTransport, test_config};
    use crate::type_info::type_info_topic;

    const RANGE_MD5: &str = "c005c34273dc426c67a020a87bc24148";

    struct Fixture {
        bus: RosBus,
        clock: Arc<ManualClock>,
        bridge: Arc<Bridge>,
    }

    fn fixture() -> Fixture {
        let bus = RosBus::new();
        let clock = Arc::new(ManualClock::new(Stamp::new(10, 0)));
        let bridge = Bridge::with_clock(
            &test_config(),
            Arc::new(bus.clone()),
            Arc::new(RecordingTransport::default()),
            clock.clone(),
        )
        .unwrap();
        Fixture { bus, clock, bridge }
    }

    fn range_info(stamped: bool) -> Vec<u8> {
        let identity = TypeIdentity::new("sensor_msgs/msg/Range", RANGE_MD5);
        TypeInfo::new(&identity, stamped).encode().unwrap()
    }

    fn metadata_topic() -> String {
        type_info_topic("bridge/in")
    }

    #[test]
    fn latency_topic_layout() {
        assert_eq!(
            latency_topic("mqtt_client", "/ping/ros"),
            "/mqtt_client/latencies/ping/ros"
        );
        assert_eq!(latency_topic("/ns/node", "plain"), "/ns/node/latencies/plain");
    }

    #[test]
    fn payload_before_metadata_is_dropped() {
        let f = fixture();
        f.bridge
            .handle_mqtt_message("bridge/in", &envelope::encode(b"early", None));
        assert!(f.bridge.inbound_route("bridge/in").unwrap().publisher().is_none());
        assert!(f.bus.topic_type("/in").is_none());
    }

    #[test]
    fn metadata_creates_typed_publisher() {
        let f = fixture();
        f.bridge.handle_mqtt_message(&metadata_topic(), &range_info(false));

        let ty = f.bus.topic_type("/in").unwrap();
        assert_eq!(ty.name, "sensor_msgs/msg/Range");
        assert_eq!(ty.md5, RANGE_MD5);
    }

    #[test]
    fn repeated_metadata_keeps_the_publisher() {
        let f = fixture();
        f.bridge.handle_mqtt_message(&metadata_topic(), &range_info(false));
        let first = f.bridge.inbound_route("bridge/in").unwrap().publisher().unwrap();
        f.bridge.handle_mqtt_message(&metadata_topic(), &range_info(false));
        let second = f.bridge.inbound_route("bridge/in").unwrap().publisher().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn malformed_metadata_is_ignored() {
        let f = fixture();
        f.bridge
            .handle_mqtt_message(&metadata_topic(), &[0x01, 0xFF, 0x00, 0x42]);
        assert!(f.bridge.inbound_route("bridge/in").unwrap().publisher().is_none());
    }

    #[tokio::test]
    async fn payload_is_published_unwrapped() {
        let f = fixture();
        let mut rx = f.bus.subscribe_receiver("/in", 10);
        f.bridge.handle_mqtt_message(&metadata_topic(), &range_info(false));

        f.bridge
            .handle_mqtt_message("bridge/in", &envelope::encode(&[9, 8, 7], None));

        let received: SerializedMessage = rx.recv().await.unwrap();
        assert_eq!(received.data, vec![9, 8, 7]);
        assert_eq!(received.type_identity.md5, RANGE_MD5);
        assert!(f.bus.topic_type("/mqtt_client/latencies/in").is_none());
    }

    #[tokio::test]
    async fn stamped_payload_reports_latency() {
        let f = fixture();
        let mut latency_rx = f.bus.subscribe_receiver("/mqtt_client/latencies/in", 10);
        f.bridge.handle_mqtt_message(&metadata_topic(), &range_info(true));
        assert!(f.bridge.inbound_route("bridge/in").unwrap().is_stamped());

        f.clock.set(Stamp::new(10, 250_000_000));
        f.bridge.handle_mqtt_message(
            "bridge/in",
            &envelope::encode(b"data", Some(Stamp::new(10, 0))),
        );

        let message = latency_rx.recv().await.unwrap();
        let latency: Float64 = message.decode().unwrap();
        assert!((latency.data - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn negative_latency_is_still_published() {
        let f = fixture();
        let mut latency_rx = f.bus.subscribe_receiver("/mqtt_client/latencies/in", 10);
        f.bridge.handle_mqtt_message(&metadata_topic(), &range_info(true));

        f.bridge.handle_mqtt_message(
            "bridge/in",
            &envelope::encode(b"data", Some(Stamp::new(11, 0))),
        );

        let latency: Float64 = latency_rx.recv().await.unwrap().decode().unwrap();
        assert!(latency.data < 0.0);
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let f = fixture();
        f.bridge.handle_mqtt_message(&metadata_topic(), &range_info(false));
        let mut rx = f.bus.subscribe_receiver("/in", 10);
        f.bridge.handle_mqtt_message("bridge/in", &[7, 1, 2]);
        f.bridge.handle_mqtt_message("bridge/in", &[]);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn changed_fingerprint_replaces_publisher() {
        let f = fixture();
        f.bridge.handle_mqtt_message(&metadata_topic(), &range_info(false));
        let other = TypeInfo::new(&TypeIdentity::new("sensor_msgs/msg/Range", "ffff"), false);
        f.bridge
            .handle_mqtt_message(&metadata_topic(), &other.encode().unwrap());
        assert_eq!(f.bus.topic_type("/in").unwrap().md5, "ffff");
    }

    #[test]
    fn unrouted_metadata_is_ignored() {
        let f = fixture();
        f.bridge
            .handle_mqtt_message(&type_info_topic("elsewhere"), &range_info(false));
        assert!(f.bus.topic_names().is_empty());
    }

    #[test]
    fn missing_definition_is_filled_from_the_bus() {
        let f = fixture();
        let _known = f
            .bus
            .advertise(
                "/other",
                TypeIdentity::new("sensor_msgs/msg/Range", RANGE_MD5).with_definition("float32 range"),
                PublisherOptions::default(),
            )
            .unwrap();
        f.bridge.handle_mqtt_message(&metadata_topic(), &range_info(false));
        let publisher = f.bridge.inbound_route("bridge/in").unwrap().publisher().unwrap();
        assert_eq!(publisher.type_identity().definition.as_deref(), Some("float32 range"));
    }
}
