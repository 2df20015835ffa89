//! Bus → broker forwarding.

use rosmqtt_types::{BridgeError, SerializedMessage};
use tracing::{debug, error, info};

use crate::bridge::Bridge;
use crate::config::Qos;
use crate::envelope;
use crate::type_info::{TypeInfo, type_info_topic};

impl Bridge {
    /// Forward one bus message received on `ros_topic` to its MQTT topic.
    ///
    /// Publishes the type metadata first whenever the route has not
    /// announced this type on the current connection.  Never fails; problems
    /// are logged and the message is dropped.
    pub fn handle_ros_message(&self, ros_topic: &str, message: SerializedMessage) {
        let Some(route) = self.ros2mqtt.get(ros_topic) else {
            let e = BridgeError::UnknownRoute(ros_topic.to_string());
            error!(error = %e, "dropping ROS message");
            return;
        };

        if !self.connection.is_connected() && !self.buffer_enabled {
            debug!(ros_topic, "not connected to broker, dropping message");
            return;
        }

        let mqtt_topic = &route.config.mqtt_topic;
        if route.claim_announcement(&message.type_identity) {
            let info = TypeInfo::new(&message.type_identity, route.config.inject_timestamp);
            let metadata_topic = type_info_topic(mqtt_topic);
            match info
                .encode()
                .and_then(|bytes| self.transport.publish(&metadata_topic, bytes, Qos::AtLeastOnce, true))
            {
                Ok(()) => info!(
                    ros_topic,
                    %metadata_topic,
                    type_name = %info.name,
                    md5 = %info.md5,
                    "published type metadata"
                ),
                Err(e) => {
                    // Try again with the next message.
                    route.reset_announcement();
                    error!(%metadata_topic, error = %e, "failed to publish type metadata");
                }
            }
        }

        let stamp = route.config.inject_timestamp.then(|| self.clock.now());
        let payload = envelope::encode(&message.data, stamp);
        let len = payload.len();
        match self
            .transport
            .publish(mqtt_topic, payload, route.config.qos, route.config.retained)
        {
            Ok(()) => debug!(ros_topic, %mqtt_topic, bytes = len, "forwarded ROS message to MQTT"),
            Err(e) => error!(%mqtt_topic, error = %e, "failed to publish MQTT message"),
        }
    }
}
