//! Shared fakes for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rosmqtt_types::BridgeError;

use crate::config::{BridgeConfig, Mqtt2RosConfig, Qos, Ros2MqttConfig};
use crate::transport::BrokerTransport;

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retained: bool,
}

/// A transport that records every request.
#[derive(Default)]
pub struct RecordingTransport {
    published: Mutex<Vec<Published>>,
    subscribed: Mutex<Vec<(String, Qos)>>,
    subscribe_requests: AtomicUsize,
    disconnects: AtomicUsize,
    reject_publish: AtomicBool,
    reject_subscribe: AtomicBool,
}

impl RecordingTransport {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.published
            .lock()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<(String, Qos)> {
        self.subscribed.lock().clone()
    }

    /// Number of subscribe requests, however many filters each carried.
    pub fn subscribe_requests(&self) -> usize {
        self.subscribe_requests.load(Ordering::SeqCst)
    }

    pub fn reject_subscribes(&self, reject: bool) {
        self.reject_subscribe.store(reject, Ordering::SeqCst);
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn reject_publishes(&self, reject: bool) {
        self.reject_publish.store(reject, Ordering::SeqCst);
    }
}

impl BrokerTransport for RecordingTransport {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> Result<(), BridgeError> {
        if self.reject_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("request queue full".to_string()));
        }
        self.published.lock().push(Published {
            topic: topic.to_string(),
            payload,
            qos,
            retained,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), BridgeError> {
        self.subscribe_many(&[(topic.to_string(), qos)])
    }

    fn subscribe_many(&self, filters: &[(String, Qos)]) -> Result<(), BridgeError> {
        if self.reject_subscribe.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("request queue full".to_string()));
        }
        self.subscribe_requests.fetch_add(1, Ordering::SeqCst);
        self.subscribed.lock().extend_from_slice(filters);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BridgeError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One route each way: `/out` → `bridge/out` and `bridge/in` → `/in`.
pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.bridge.ros2mqtt.push(Ros2MqttConfig {
        ros_topic: "/out".to_string(),
        mqtt_topic: "bridge/out".to_string(),
        queue_size: 10,
        qos: Qos::AtLeastOnce,
        retained: false,
        inject_timestamp: false,
    });
    config.bridge.mqtt2ros.push(Mqtt2RosConfig {
        mqtt_topic: "bridge/in".to_string(),
        ros_topic: "/in".to_string(),
        qos: Qos::AtMostOnce,
        queue_size: 10,
        latched: false,
    });
    config
}
