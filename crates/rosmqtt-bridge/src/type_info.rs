//! Type metadata exchanged over MQTT.
//!
//! Before the first payload of a route, the outbound side publishes a
//! [`TypeInfo`] on the route's metadata topic: the route's MQTT topic under
//! the reserved [`TYPE_INFO_TOPIC_PREFIX`].  The inbound side uses it to
//! advertise a bus publisher for a type it has never seen.
//!
//! The prefix is the only thing that tells metadata apart from payload on
//! the inbound side.  Changing it breaks wire compatibility with every peer.
//!
//! Wire form: a UTF-8 JSON object
//! `{"name": ..., "md5": ..., "definition": ..., "stamped": ...}` where
//! `definition` may be absent.

use rosmqtt_types::{BridgeError, TypeIdentity};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reserved MQTT topic prefix for type metadata.  Carries its trailing `/`.
pub const TYPE_INFO_TOPIC_PREFIX: &str = "mqtt_client/ros_msg_type/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TypeInfo {
    pub name: String,
    pub md5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    /// Whether payloads on this topic carry a send timestamp.
    #[serde(default)]
    pub stamped: bool,
}

impl TypeInfo {
    pub fn new(identity: &TypeIdentity, stamped: bool) -> Self {
        Self {
            name: identity.name.clone(),
            md5: identity.md5.clone(),
            definition: identity.definition.clone(),
            stamped,
        }
    }

    pub fn identity(&self) -> TypeIdentity {
        TypeIdentity {
            name: self.name.clone(),
            md5: self.md5.clone(),
            definition: self.definition.clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(self).map_err(|e| BridgeError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BridgeError> {
        let info: TypeInfo = serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::MalformedTypeInfo(e.to_string()))?;
        if info.name.is_empty() || info.md5.is_empty() {
            return Err(BridgeError::MalformedTypeInfo(
                "type name and md5 must not be empty".to_string(),
            ));
        }
        Ok(info)
    }
}

/// Metadata topic for the payload topic `mqtt_topic`.
pub fn type_info_topic(mqtt_topic: &str) -> String {
    format!("{TYPE_INFO_TOPIC_PREFIX}{mqtt_topic}")
}

/// The payload topic a metadata topic describes, or `None` for a payload
/// topic.
pub fn described_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix(TYPE_INFO_TOPIC_PREFIX)
}
