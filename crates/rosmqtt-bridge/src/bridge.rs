//! The bridge itself.
//!
//! [`Bridge`] owns the route tables and the connection state and is wired to
//! both sides through traits: it talks to the bus through a
//! [`MessageBus`] and to the broker through a [`BrokerTransport`], and is
//! driven by the transport through [`ConnectionEventSink`] and
//! [`MessageSink`].  The forwarding logic lives in `outbound.rs` and
//! `inbound.rs`.
//!
//! ```text
//! bus subscription ──► handle_ros_message ──► BrokerTransport::publish
//! MessageSink::message_arrived ──► metadata? ──► advertise bus publisher
//!                                └─► payload  ──► GenericPublisher::publish
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use rosmqtt_middleware::{MessageBus, MessageCallback};
use rosmqtt_types::BridgeError;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{BridgeConfig, Qos};
use crate::connection::{ConnectionEvent, ConnectionMonitor, ConnectionState};
use crate::inbound::latency_topic;
use crate::routes::{InboundRoute, OutboundRoute, RouteTable};
use crate::transport::{BrokerTransport, ConnectionEventSink, DeliveryToken, MessageSink};
use crate::type_info::type_info_topic;

pub struct Bridge {
    pub(crate) node_name: String,
    pub(crate) buffer_enabled: bool,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) transport: Arc<dyn BrokerTransport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) connection: ConnectionMonitor,
    pub(crate) ros2mqtt: RouteTable<OutboundRoute>,
    pub(crate) mqtt2ros: RouteTable<InboundRoute>,
    /// Set on connect until the broker subscription request is queued.
    inbound_pending: AtomicBool,
    this: Weak<Bridge>,
}

impl Bridge {
    pub fn new(
        config: &BridgeConfig,
        bus: Arc<dyn MessageBus>,
        transport: Arc<dyn BrokerTransport>,
    ) -> Result<Arc<Self>, BridgeError> {
        Self::with_clock(config, bus, transport, Arc::new(SystemClock))
    }

    /// Like [`Bridge::new`] with an explicit time source.
    pub fn with_clock(
        config: &BridgeConfig,
        bus: Arc<dyn MessageBus>,
        transport: Arc<dyn BrokerTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, BridgeError> {
        config.validate()?;

        let ros2mqtt = RouteTable::build(
            config
                .bridge
                .ros2mqtt
                .iter()
                .map(|route| (route.ros_topic.clone(), OutboundRoute::new(route.clone()))),
        )?;
        let mqtt2ros = RouteTable::build(config.bridge.mqtt2ros.iter().map(|route| {
            let latency = latency_topic(&config.node_name, &route.ros_topic);
            (route.mqtt_topic.clone(), InboundRoute::new(route.clone(), latency))
        }))?;

        for (ros_topic, route) in ros2mqtt.iter() {
            info!(
                ros_topic,
                mqtt_topic = %route.config.mqtt_topic,
                qos = %route.config.qos,
                stamped = route.config.inject_timestamp,
                "bridging ROS topic to MQTT"
            );
        }
        for (mqtt_topic, route) in mqtt2ros.iter() {
            info!(
                mqtt_topic,
                ros_topic = %route.config.ros_topic,
                qos = %route.config.qos,
                "bridging MQTT topic to ROS"
            );
        }

        Ok(Arc::new_cyclic(|this| Bridge {
            node_name: config.node_name.clone(),
            buffer_enabled: config.client.buffer.enabled,
            bus,
            transport,
            clock,
            connection: ConnectionMonitor::new(),
            ros2mqtt,
            mqtt2ros,
            inbound_pending: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Non-blocking; safe to call from any callback.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn outbound_route(&self, ros_topic: &str) -> Option<&OutboundRoute> {
        self.ros2mqtt.get(ros_topic)
    }

    pub fn inbound_route(&self, mqtt_topic: &str) -> Option<&InboundRoute> {
        self.mqtt2ros.get(mqtt_topic)
    }

    /// Whether the broker subscriptions of the current connection still
    /// have to be requested.
    pub fn inbound_subscriptions_pending(&self) -> bool {
        self.inbound_pending.load(Ordering::Acquire)
    }

    /// Subscribe to every outbound bus topic whose type is known by now, and
    /// retry the broker subscriptions the transport could not queue.
    ///
    /// A topic only gets a type once some publisher advertises it, so this
    /// is meant to be called periodically.  Returns the number of
    /// subscriptions still waiting, counting the broker side as one.
    pub fn setup_subscriptions(&self) -> usize {
        let mut pending = 0;
        if self.connection.is_connected() {
            self.subscribe_inbound_topics();
        }
        if self.inbound_subscriptions_pending() {
            pending += 1;
        }
        for (ros_topic, route) in self.ros2mqtt.iter() {
            if route.is_subscribed() {
                continue;
            }
            let Some(type_identity) = self.bus.topic_type(ros_topic) else {
                debug!(ros_topic, "no publisher yet, deferring subscription");
                pending += 1;
                continue;
            };

            let bridge = self.this.clone();
            let topic = ros_topic.to_string();
            let callback: MessageCallback = Box::new(move |message| {
                if let Some(bridge) = bridge.upgrade() {
                    bridge.handle_ros_message(&topic, message);
                }
            });

            match self.bus.subscribe(ros_topic, route.config.queue_size, callback) {
                Ok(handle) => {
                    if route.attach_subscription(handle, Arc::clone(&type_identity)) {
                        info!(
                            ros_topic,
                            type_name = %type_identity.name,
                            mqtt_topic = %route.config.mqtt_topic,
                            "subscribed to ROS topic"
                        );
                    }
                }
                Err(e) => {
                    error!(ros_topic, error = %e, "failed to subscribe to ROS topic");
                    pending += 1;
                }
            }
        }
        pending
    }

    /// Drop every bus subscription and ask the transport to disconnect.
    pub fn shutdown(&self) {
        for (_, route) in self.ros2mqtt.iter() {
            drop(route.detach_subscription());
        }
        info!("disconnecting from broker");
        if let Err(e) = self.transport.disconnect() {
            warn!(error = %e, "disconnect request failed");
        }
    }

    /// Request every inbound payload and metadata subscription at once.
    fn subscribe_inbound_topics(&self) {
        if !self.inbound_pending.swap(false, Ordering::AcqRel) || self.mqtt2ros.is_empty() {
            return;
        }
        let filters: Vec<(String, Qos)> = self
            .mqtt2ros
            .iter()
            .flat_map(|(mqtt_topic, route)| {
                // Metadata must not be lost, whatever the payload QoS.
                [
                    (mqtt_topic.to_string(), route.config.qos),
                    (type_info_topic(mqtt_topic), route.config.qos.max(Qos::AtLeastOnce)),
                ]
            })
            .collect();
        match self.transport.subscribe_many(&filters) {
            Ok(()) => debug!(
                filters = filters.len(),
                "subscribed to MQTT topics and their type metadata"
            ),
            Err(e) => {
                self.inbound_pending.store(true, Ordering::Release);
                warn!(error = %e, "failed to subscribe to MQTT topics, will retry");
            }
        }
    }
}

impl ConnectionEventSink for Bridge {
    fn connecting(&self) {
        let transition = self.connection.apply(ConnectionEvent::Connect);
        if transition.changed() {
            info!("connecting to broker");
        }
    }

    fn connected(&self, cause: &str) {
        // Announcements are per connection; clear them before outbound
        // messages can observe the connected state.
        for (_, route) in self.ros2mqtt.iter() {
            route.reset_announcement();
        }
        self.connection.apply(ConnectionEvent::Connected);
        info!(cause, "connected to broker");
        self.inbound_pending.store(true, Ordering::Release);
        self.subscribe_inbound_topics();
    }

    fn connection_lost(&self, cause: &str) {
        let transition = self.connection.apply(ConnectionEvent::ConnectionLost);
        match transition.from {
            ConnectionState::Connected => warn!(cause, "connection to broker lost"),
            ConnectionState::Connecting => warn!(cause, "connecting to broker failed"),
            ConnectionState::Disconnected => debug!(cause, "transport error while disconnected"),
        }
    }
}

impl MessageSink for Bridge {
    fn message_arrived(&self, topic: &str, payload: &[u8]) {
        self.handle_mqtt_message(topic, payload);
    }

    fn delivery_complete(&self, token: DeliveryToken) {
        debug!(packet_id = token.packet_id, "delivery complete");
    }

    fn delivery_failed(&self, action: &str, cause: &str) {
        error!(action, cause, "MQTT action failed");
    }
}
