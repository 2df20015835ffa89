//! The broker-side seam of the bridge.
//!
//! The bridge consumes an MQTT client through [`BrokerTransport`] and is
//! driven by it through two narrow callback interfaces,
//! [`ConnectionEventSink`] and [`MessageSink`].  The transport owns its
//! threads; every sink method is invoked from them.
//!
//! All transport calls are fire-and-forget.  An `Err` only means the request
//! could not be queued; delivery failures arrive later through
//! [`MessageSink::delivery_failed`].

use rosmqtt_types::BridgeError;

use crate::config::Qos;

pub trait BrokerTransport: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> Result<(), BridgeError>;

    fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), BridgeError>;

    /// Subscribe to every `(topic, qos)` pair.  Transports with a bounded
    /// request queue should send them as a single request.
    fn subscribe_many(&self, filters: &[(String, Qos)]) -> Result<(), BridgeError> {
        filters
            .iter()
            .try_for_each(|(topic, qos)| self.subscribe(topic, *qos))
    }

    fn disconnect(&self) -> Result<(), BridgeError>;
}

/// Connectivity callbacks.
pub trait ConnectionEventSink: Send + Sync {
    /// A connection attempt is starting.
    fn connecting(&self) {}

    fn connected(&self, cause: &str);

    fn connection_lost(&self, cause: &str);
}

/// Identifies one acknowledged delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryToken {
    pub packet_id: u16,
}

/// Message callbacks.
pub trait MessageSink: Send + Sync {
    fn message_arrived(&self, topic: &str, payload: &[u8]);

    fn delivery_complete(&self, token: DeliveryToken);

    /// An asynchronous transport action (connect, publish, subscribe) failed.
    fn delivery_failed(&self, action: &str, cause: &str);
}
