//! [`BrokerTransport`] on top of `rumqttc`.
//!
//! [`connect`] maps a [`BridgeConfig`] onto [`MqttOptions`] and splits the
//! client in two: an [`MqttTransport`] the bridge publishes through, and an
//! [`MqttEventLoop`] that drives the connection and feeds broker events back
//! into the sinks.  Nothing touches the network until the event loop runs.
//!
//! Reconnection is the event loop's job: after an error it waits (doubling
//! the delay up to [`MAX_RECONNECT_DELAY`]) and polls again, which makes
//! `rumqttc` open a fresh connection.

use std::sync::Arc;
use std::time::Duration;

use rosmqtt_types::BridgeError;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    QoS, SubscribeFilter, SubscribeReasonCode, TlsConfiguration, Transport,
};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{BridgeConfig, Qos};
use crate::transport::{BrokerTransport, ConnectionEventSink, DeliveryToken, MessageSink};

/// Request queue depth when the client buffer is disabled.
const DEFAULT_REQUEST_CAPACITY: usize = 64;
/// Largest packet accepted in either direction (the MQTT maximum).
const MAX_PACKET_SIZE: usize = 268_435_455;
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

impl From<Qos> for QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
            Qos::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Client id to connect with: the configured one, or a fresh random id.
pub fn client_id(config: &BridgeConfig) -> String {
    if config.client.id.is_empty() {
        format!("mqtt_client_{}", Uuid::new_v4().simple())
    } else {
        config.client.id.clone()
    }
}

/// Translate the configuration into `rumqttc` options.
///
/// Reads the TLS certificate files, so paths should be resolved first.
pub fn mqtt_options(config: &BridgeConfig) -> Result<MqttOptions, BridgeError> {
    config.validate()?;
    let broker = &config.broker;
    let client = &config.client;

    let mut options = MqttOptions::new(client_id(config), &broker.host, broker.port);
    options.set_keep_alive(Duration::from_secs_f64(client.keep_alive_interval));
    options.set_clean_session(client.clean_session);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    let inflight = u16::try_from(client.max_inflight)
        .map_err(|_| BridgeError::Config("max_inflight must be between 1 and 65535".to_string()))?;
    options.set_inflight(inflight);

    if !broker.user.is_empty() {
        options.set_credentials(&broker.user, &broker.pass);
    }

    if let Some(will) = &client.last_will {
        options.set_last_will(LastWill::new(
            &will.topic,
            will.message.as_bytes().to_vec(),
            will.qos.into(),
            will.retained,
        ));
    }

    if broker.tls.enabled {
        let ca = read_file("CA certificate", &broker.tls.ca_certificate)?;
        let tls = &client.tls;
        let client_auth = if !tls.certificate.as_os_str().is_empty() && !tls.key.as_os_str().is_empty() {
            Some((
                read_file("client certificate", &tls.certificate)?,
                read_file("client key", &tls.key)?,
            ))
        } else {
            None
        };
        if !tls.password.is_empty() {
            warn!("encrypted client keys are not supported, ignoring the key password");
        }
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        }));
    }

    if client.buffer.enabled {
        warn!(
            directory = %client.buffer.directory.display(),
            size = client.buffer.size,
            "persistent buffering is not supported, buffering in memory"
        );
    }

    Ok(options)
}

fn read_file(what: &str, path: &std::path::Path) -> Result<Vec<u8>, BridgeError> {
    std::fs::read(path)
        .map_err(|e| BridgeError::Config(format!("cannot read {what} '{}': {e}", path.display())))
}

/// Build the client for `config` without connecting.
pub fn connect(config: &BridgeConfig) -> Result<(MqttTransport, MqttEventLoop), BridgeError> {
    let options = mqtt_options(config)?;
    let capacity = if config.client.buffer.enabled && config.client.buffer.size > 0 {
        config.client.buffer.size
    } else {
        DEFAULT_REQUEST_CAPACITY
    };
    info!(
        host = %config.broker.host,
        port = config.broker.port,
        client_id = %options.client_id(),
        tls = config.broker.tls.enabled,
        "configured MQTT client"
    );
    let (client, eventloop) = AsyncClient::new(options, capacity);
    Ok((MqttTransport { client }, MqttEventLoop { eventloop }))
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Publishing half of the client.  Every call only queues a request.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl BrokerTransport for MqttTransport {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> Result<(), BridgeError> {
        self.client
            .try_publish(topic, qos.into(), retained, payload)
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), BridgeError> {
        self.client
            .try_subscribe(topic, qos.into())
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    /// One SUBSCRIBE packet for all filters, so it takes a single slot of
    /// the request queue however many routes there are.
    fn subscribe_many(&self, filters: &[(String, Qos)]) -> Result<(), BridgeError> {
        if filters.is_empty() {
            return Ok(());
        }
        let filters = filters
            .iter()
            .map(|(topic, qos)| SubscribeFilter::new(topic.clone(), (*qos).into()));
        self.client
            .try_subscribe_many(filters)
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    fn disconnect(&self) -> Result<(), BridgeError> {
        self.client
            .try_disconnect()
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Connection-driving half of the client.
pub struct MqttEventLoop {
    eventloop: EventLoop,
}

impl MqttEventLoop {
    /// Drive the connection until `shutdown` turns `true`.
    ///
    /// Connection changes go to `connection`, broker messages and
    /// acknowledgements to `messages`.
    pub async fn run(
        mut self,
        connection: Arc<dyn ConnectionEventSink>,
        messages: Arc<dyn MessageSink>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut delay = INITIAL_RECONNECT_DELAY;
        connection.connecting();

        loop {
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        delay = INITIAL_RECONNECT_DELAY;
                        let cause = if ack.session_present {
                            "session resumed"
                        } else {
                            "new session"
                        };
                        connection.connected(cause);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    messages.message_arrived(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    messages.delivery_complete(DeliveryToken { packet_id: ack.pkid });
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    messages.delivery_complete(DeliveryToken { packet_id: comp.pkid });
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    for code in &ack.return_codes {
                        if matches!(code, SubscribeReasonCode::Failure) {
                            messages.delivery_failed(
                                "subscribe",
                                &format!("broker rejected subscription (packet {})", ack.pkid),
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    connection.connection_lost(&e.to_string());
                    debug!(retry_in = ?delay, "waiting before reconnecting");
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                    connection.connecting();
                }
            }
        }

        self.flush_disconnect().await;
    }

    /// Poll until a queued disconnect request has gone out, or give up.
    async fn flush_disconnect(&mut self) {
        let flushed = timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            warn!("broker did not acknowledge disconnect in time");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::config::{LastWillConfig, Mqtt2RosConfig};
    use crate::testing::test_config;
    use rosmqtt_middleware::RosBus;
    use std::io::Write;

    fn many_inbound_routes(count: usize) -> BridgeConfig {
        let mut config = test_config();
        for i in 0..count {
            config.bridge.mqtt2ros.push(Mqtt2RosConfig {
                mqtt_topic: format!("bridge/in/{i}"),
                ros_topic: format!("/in_{i}"),
                qos: Qos::AtLeastOnce,
                queue_size: 1,
                latched: false,
            });
        }
        config
    }

    #[test]
    fn qos_maps_to_rumqttc() {
        assert_eq!(QoS::from(Qos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(QoS::from(Qos::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::from(Qos::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn empty_client_id_is_generated() {
        let config = test_config();
        let a = client_id(&config);
        let b = client_id(&config);
        assert!(a.starts_with("mqtt_client_"));
        assert_ne!(a, b);
    }

    #[test]
    fn configured_client_id_is_kept() {
        let mut config = test_config();
        config.client.id = "robot-7".to_string();
        assert_eq!(client_id(&config), "robot-7");
    }

    #[test]
    fn options_follow_config() {
        let mut config = test_config();
        config.broker.host = "broker.local".to_string();
        config.broker.port = 8883;
        config.broker.user = "user".to_string();
        config.broker.pass = "secret".to_string();
        config.client.id = "robot-7".to_string();
        config.client.clean_session = false;
        config.client.keep_alive_interval = 15.0;
        config.client.max_inflight = 20;
        config.client.last_will = Some(LastWillConfig {
            topic: "robot/status".to_string(),
            message: "offline".to_string(),
            qos: Qos::AtLeastOnce,
            retained: true,
        });

        let options = mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(options.client_id(), "robot-7");
        assert!(!options.clean_session());
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert_eq!(options.inflight(), 20);
        assert_eq!(
            options.credentials(),
            Some(("user".to_string(), "secret".to_string()))
        );
        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "robot/status");
        assert_eq!(&will.message[..], b"offline");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
    }

    #[test]
    fn no_credentials_without_user() {
        let options = mqtt_options(&test_config()).unwrap();
        assert!(options.credentials().is_none());
    }

    #[test]
    fn missing_ca_certificate_is_a_config_error() {
        let mut config = test_config();
        config.broker.tls.enabled = true;
        config.broker.tls.ca_certificate = "/nonexistent/ca.crt".into();
        assert!(matches!(mqtt_options(&config), Err(BridgeError::Config(_))));
    }

    #[test]
    fn readable_ca_certificate_enables_tls() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        ca.write_all(b"-----BEGIN CERTIFICATE-----\n").unwrap();
        let mut config = test_config();
        config.broker.tls.enabled = true;
        config.broker.tls.ca_certificate = ca.path().to_path_buf();
        assert!(mqtt_options(&config).is_ok());
    }

    #[test]
    fn huge_keep_alive_is_a_config_error() {
        let mut config = test_config();
        config.client.keep_alive_interval = 1e20;
        assert!(matches!(mqtt_options(&config), Err(BridgeError::Config(_))));
    }

    #[test]
    fn connect_subscribes_every_route_before_the_loop_runs() {
        let config = many_inbound_routes(40);
        let (transport, _eventloop) = connect(&config).unwrap();
        let bridge = Bridge::new(
            &config,
            Arc::new(RosBus::new()),
            Arc::new(transport.clone()),
        )
        .unwrap();

        // The event loop is not polled while `connected` runs.
        bridge.connected("new session");
        assert!(!bridge.inbound_subscriptions_pending());

        // The request queue still has room for outbound traffic.
        for _ in 0..DEFAULT_REQUEST_CAPACITY - 1 {
            transport
                .publish("bridge/out", vec![0], Qos::AtMostOnce, false)
                .unwrap();
        }
    }

    #[test]
    fn single_slot_buffer_still_subscribes() {
        let mut config = test_config();
        config.client.id = "robot-7".to_string();
        config.client.buffer.enabled = true;
        config.client.buffer.size = 1;
        let (transport, _eventloop) = connect(&config).unwrap();
        let bridge = Bridge::new(
            &config,
            Arc::new(RosBus::new()),
            Arc::new(transport.clone()),
        )
        .unwrap();

        bridge.connected("new session");
        assert!(!bridge.inbound_subscriptions_pending());
        assert!(
            transport
                .publish("bridge/out", vec![0], Qos::AtMostOnce, false)
                .is_err()
        );
    }

    #[test]
    fn full_request_queue_leaves_subscriptions_pending() {
        let mut config = test_config();
        config.client.id = "robot-7".to_string();
        config.client.buffer.enabled = true;
        config.client.buffer.size = 1;
        let (transport, _eventloop) = connect(&config).unwrap();
        let bridge = Bridge::new(
            &config,
            Arc::new(RosBus::new()),
            Arc::new(transport.clone()),
        )
        .unwrap();

        transport
            .publish("bridge/out", vec![0], Qos::AtMostOnce, false)
            .unwrap();
        bridge.connected("new session");
        assert!(bridge.inbound_subscriptions_pending());
    }

    #[test]
    fn empty_filter_list_is_not_sent() {
        let (transport, _eventloop) = connect(&test_config()).unwrap();
        transport.subscribe_many(&[]).unwrap();
    }

    #[tokio::test]
    async fn transport_queues_requests_without_a_connection() {
        let (transport, _eventloop) = connect(&test_config()).unwrap();
        transport
            .publish("bridge/out", vec![0, 1], Qos::AtLeastOnce, false)
            .unwrap();
        transport.subscribe("bridge/in", Qos::AtMostOnce).unwrap();
        transport.disconnect().unwrap();
    }
}
