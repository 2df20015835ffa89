//! `rosmqtt-bridge` – forwards messages between a ROS bus and an MQTT
//! broker.
//!
//! Bus messages on configured topics are wrapped in a small envelope and
//! published to MQTT.  MQTT messages on configured topics are unwrapped and
//! republished on the bus.  Payloads stay opaque: a receiving bridge learns
//! the message type from metadata the sending bridge publishes on a
//! companion topic, and advertises a matching bus publisher on the fly.
//!
//! # Modules
//!
//! - [`config`] – [`BridgeConfig`], routes and validation.
//! - [`envelope`] – the bytes on the wire around each payload.
//! - [`type_info`] – [`TypeInfo`] metadata and its reserved topic prefix.
//! - [`bridge`] – [`Bridge`], the forwarding engine.
//! - [`connection`] – the broker connection state machine.
//! - [`routes`] – immutable route tables with per-route state.
//! - [`transport`] – the broker seam ([`BrokerTransport`] and sinks).
//! - [`mqtt`] – the `rumqttc` implementation of that seam.
//! - [`clock`] – time source for stamps and latencies.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rosmqtt_bridge::{Bridge, BridgeConfig, mqtt};
//! use rosmqtt_middleware::RosBus;
//! use tokio::sync::watch;
//!
//! # async fn run(config: BridgeConfig) -> Result<(), rosmqtt_types::BridgeError> {
//! let bus = RosBus::new();
//! let (transport, eventloop) = mqtt::connect(&config)?;
//! let bridge = Bridge::new(&config, Arc::new(bus), Arc::new(transport))?;
//! let (_stop, shutdown) = watch::channel(false);
//! tokio::spawn(eventloop.run(bridge.clone(), bridge.clone(), shutdown));
//! bridge.setup_subscriptions();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod clock;
pub mod config;
pub mod connection;
pub mod envelope;
mod inbound;
pub mod mqtt;
mod outbound;
pub mod routes;
pub mod transport;
pub mod type_info;

#[cfg(test)]
mod testing;

pub use bridge::Bridge;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BridgeConfig, BrokerConfig, ClientConfig, Mqtt2RosConfig, Qos, Ros2MqttConfig, RoutesConfig,
};
pub use connection::{ConnectionEvent, ConnectionMonitor, ConnectionState};
pub use envelope::Envelope;
pub use inbound::latency_topic;
pub use transport::{BrokerTransport, ConnectionEventSink, DeliveryToken, MessageSink};
pub use type_info::{TYPE_INFO_TOPIC_PREFIX, TypeInfo};
