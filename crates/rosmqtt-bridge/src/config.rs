//! Static configuration of the bridge.
//!
//! Broker identity, client identity and the set of forwarding routes.  The
//! structs are deserialised once at startup (see the `mqtt_client` binary
//! for the TOML loader), checked with [`BridgeConfig::validate`] and never
//! mutated afterwards.
//!
//! Defaults match the parameters of the ROS `mqtt_client` node.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use rosmqtt_types::BridgeError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::type_info::TYPE_INFO_TOPIC_PREFIX;

/// MQTT quality of service, written as `0`, `1` or `2` in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize, JsonSchema)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pass: String,

    #[serde(default)]
    pub tls: BrokerTlsConfig,
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", if self.pass.is_empty() { &"<not set>" } else { &"<redacted>" })
            .field("tls", &self.tls)
            .finish()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: String::new(),
            pass: String::new(),
            tls: BrokerTlsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BrokerTlsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// CA certificate trusted by the client.
    #[serde(default)]
    pub ca_certificate: PathBuf,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClientConfig {
    /// Client identifier, unique per broker.  Generated when empty.
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub last_will: Option<LastWillConfig>,

    #[serde(default = "default_true")]
    pub clean_session: bool,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_interval: f64,

    #[serde(default = "default_max_inflight")]
    pub max_inflight: u32,

    #[serde(default)]
    pub tls: ClientTlsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            buffer: BufferConfig::default(),
            last_will: None,
            clean_session: true,
            keep_alive_interval: default_keep_alive(),
            max_inflight: default_max_inflight(),
            tls: ClientTlsConfig::default(),
        }
    }
}

/// Store-and-forward of outgoing messages while disconnected.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BufferConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Maximum number of buffered messages.
    #[serde(default)]
    pub size: usize,

    #[serde(default = "default_buffer_directory")]
    pub directory: PathBuf,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size: 0,
            directory: default_buffer_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LastWillConfig {
    pub topic: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    #[schemars(with = "u8")]
    pub qos: Qos,

    #[serde(default)]
    pub retained: bool,
}

#[derive(Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ClientTlsConfig {
    #[serde(default)]
    pub certificate: PathBuf,

    #[serde(default)]
    pub key: PathBuf,

    /// Decryption password for the private key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl fmt::Debug for ClientTlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTlsConfig")
            .field("certificate", &self.certificate)
            .field("key", &self.key)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// A bus topic forwarded to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Ros2MqttConfig {
    pub ros_topic: String,

    pub mqtt_topic: String,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default)]
    #[schemars(with = "u8")]
    pub qos: Qos,

    #[serde(default)]
    pub retained: bool,

    /// Inject the send time so the receiving side can measure latency.
    #[serde(default, alias = "stamped")]
    pub inject_timestamp: bool,
}

/// A broker topic forwarded to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Mqtt2RosConfig {
    pub mqtt_topic: String,

    pub ros_topic: String,

    #[serde(default)]
    #[schemars(with = "u8")]
    pub qos: Qos,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default)]
    pub latched: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RoutesConfig {
    #[serde(default)]
    pub ros2mqtt: Vec<Ros2MqttConfig>,

    #[serde(default)]
    pub mqtt2ros: Vec<Mqtt2RosConfig>,
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BridgeConfig {
    /// Namespace under which latency topics are published.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub bridge: RoutesConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            broker: BrokerConfig::default(),
            client: ClientConfig::default(),
            bridge: RoutesConfig::default(),
        }
    }
}

/// The CONNECT packet carries the keep-alive as a 16-bit number of seconds.
const MAX_KEEP_ALIVE_SECS: f64 = u16::MAX as f64;

impl BridgeConfig {
    /// Check every cross-field rule the bridge relies on.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.broker.host.is_empty() {
            return Err(config_error("broker host must not be empty"));
        }
        if self.broker.tls.enabled && self.broker.tls.ca_certificate.as_os_str().is_empty() {
            return Err(config_error("broker TLS is enabled but no CA certificate is set"));
        }

        let client = &self.client;
        if client.id.is_empty() && client.buffer.enabled {
            return Err(config_error("client buffer cannot be enabled when client ID is empty"));
        }
        if client.id.is_empty() && !client.clean_session {
            return Err(config_error("a persistent session requires a client ID"));
        }
        if !client.keep_alive_interval.is_finite()
            || client.keep_alive_interval < 0.0
            || (client.keep_alive_interval > 0.0 && client.keep_alive_interval < 1.0)
            || client.keep_alive_interval > MAX_KEEP_ALIVE_SECS
        {
            return Err(config_error(
                "keep-alive interval must be 0 (disabled) or between 1 and 65535 seconds",
            ));
        }
        if !(1..=u32::from(u16::MAX)).contains(&client.max_inflight) {
            return Err(config_error("max_inflight must be between 1 and 65535"));
        }
        if let Some(will) = &client.last_will
            && will.topic.is_empty()
        {
            return Err(config_error("last-will topic must not be empty"));
        }

        if self.bridge.ros2mqtt.is_empty() && self.bridge.mqtt2ros.is_empty() {
            return Err(config_error("no ros2mqtt or mqtt2ros route is configured"));
        }

        let mut ros_topics = HashSet::new();
        for route in &self.bridge.ros2mqtt {
            check_topic("ros2mqtt ros_topic", &route.ros_topic)?;
            check_mqtt_topic("ros2mqtt mqtt_topic", &route.mqtt_topic)?;
            if route.mqtt_topic.contains(['+', '#']) {
                return Err(config_error(format!(
                    "ros2mqtt mqtt_topic '{}' must not contain wildcards",
                    route.mqtt_topic
                )));
            }
            if !ros_topics.insert(route.ros_topic.as_str()) {
                return Err(config_error(format!(
                    "ros_topic '{}' is bridged to MQTT more than once",
                    route.ros_topic
                )));
            }
        }

        let mut mqtt_topics = HashSet::new();
        for route in &self.bridge.mqtt2ros {
            check_mqtt_topic("mqtt2ros mqtt_topic", &route.mqtt_topic)?;
            check_topic("mqtt2ros ros_topic", &route.ros_topic)?;
            if route.mqtt_topic.contains(['+', '#']) {
                return Err(config_error(format!(
                    "mqtt2ros mqtt_topic '{}' must not contain wildcards",
                    route.mqtt_topic
                )));
            }
            if !mqtt_topics.insert(route.mqtt_topic.as_str()) {
                return Err(config_error(format!(
                    "mqtt_topic '{}' is bridged to ROS more than once",
                    route.mqtt_topic
                )));
            }
        }

        Ok(())
    }

    /// Resolve every relative file path against `ROS_HOME` (or the current
    /// directory when it is unset).
    pub fn resolve_paths(&mut self) {
        let base = ros_home();
        self.resolve_paths_in(base.as_deref());
    }

    pub(crate) fn resolve_paths_in(&mut self, base: Option<&Path>) {
        self.broker.tls.ca_certificate = resolve_path_in(&self.broker.tls.ca_certificate, base);
        self.client.tls.certificate = resolve_path_in(&self.client.tls.certificate, base);
        self.client.tls.key = resolve_path_in(&self.client.tls.key, base);
        self.client.buffer.directory = resolve_path_in(&self.client.buffer.directory, base);
    }
}

/// Resolve `path` against `ROS_HOME`, or the current directory when
/// `ROS_HOME` is unset.  Empty and absolute paths are returned unchanged.
pub fn resolve_path(path: &Path) -> PathBuf {
    resolve_path_in(path, ros_home().as_deref())
}

pub(crate) fn resolve_path_in(path: &Path, base: Option<&Path>) -> PathBuf {
    if path.as_os_str().is_empty() || path.is_absolute() {
        return path.to_path_buf();
    }
    match base {
        Some(base) => base.join(path),
        None => path.to_path_buf(),
    }
}

fn ros_home() -> Option<PathBuf> {
    std::env::var_os("ROS_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
}

fn check_topic(what: &str, topic: &str) -> Result<(), BridgeError> {
    if topic.is_empty() {
        return Err(config_error(format!("{what} must not be empty")));
    }
    Ok(())
}

fn check_mqtt_topic(what: &str, topic: &str) -> Result<(), BridgeError> {
    check_topic(what, topic)?;
    if topic.starts_with(TYPE_INFO_TOPIC_PREFIX) {
        return Err(config_error(format!(
            "{what} '{topic}' uses the reserved prefix '{TYPE_INFO_TOPIC_PREFIX}'"
        )));
    }
    Ok(())
}

fn config_error(message: impl Into<String>) -> BridgeError {
    BridgeError::Config(message.into())
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_true() -> bool {
    true
}
fn default_keep_alive() -> f64 {
    60.0
}
fn default_max_inflight() -> u32 {
    65535
}
fn default_buffer_directory() -> PathBuf {
    PathBuf::from("mqtt_client_states")
}
fn default_queue_size() -> usize {
    1
}
fn default_node_name() -> String {
    "mqtt_client".to_string()
}
