//! Type-erased bus messages.
//!
//! The bridge never looks inside a payload.  A message is carried as its
//! serialized bytes plus a [`TypeIdentity`] naming the type, so that a
//! receiver with no compile-time knowledge of the type can still advertise a
//! matching publisher.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::BridgeError;

/// Runtime identity of a message type.
///
/// Two identities describe the same type when both `name` and `md5` agree;
/// the optional `definition` text is informational.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct TypeIdentity {
    /// Fully qualified type name, e.g. `"std_msgs/msg/Float64"`.
    pub name: String,
    /// Content fingerprint of the message structure.
    pub md5: String,
    /// Message definition text, when the producer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

impl TypeIdentity {
    pub fn new(name: impl Into<String>, md5: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            md5: md5.into(),
            definition: None,
        }
    }

    /// Attach the definition text (builder-style).
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    /// Identity of a statically known [`RosMessage`] type.
    pub fn of<M: RosMessage>() -> Self {
        Self::new(M::TYPE_NAME, M::MD5SUM).with_definition(M::DEFINITION)
    }

    /// True when `other` names the same type with the same fingerprint.
    pub fn same_type(&self, other: &TypeIdentity) -> bool {
        self.name == other.name && self.md5 == other.md5
    }
}

/// Serialized message bytes tagged with their type.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedMessage {
    pub type_identity: Arc<TypeIdentity>,
    pub data: Vec<u8>,
}

impl SerializedMessage {
    pub fn new(type_identity: Arc<TypeIdentity>, data: Vec<u8>) -> Self {
        Self { type_identity, data }
    }

    /// Serialize a statically typed message.
    pub fn from_message<M: RosMessage>(message: &M) -> Self {
        Self {
            type_identity: Arc::new(TypeIdentity::of::<M>()),
            data: message.to_cdr(),
        }
    }

    /// Deserialize into `M`, failing if the tagged type is not `M`.
    pub fn decode<M: RosMessage>(&self) -> Result<M, BridgeError> {
        if self.type_identity.name != M::TYPE_NAME || self.type_identity.md5 != M::MD5SUM {
            return Err(BridgeError::Serialization(format!(
                "message of type '{}' cannot be decoded as '{}'",
                self.type_identity.name,
                M::TYPE_NAME
            )));
        }
        M::from_cdr(&self.data)
    }
}

/// A message type known at compile time.
pub trait RosMessage: Sized {
    const TYPE_NAME: &'static str;
    const MD5SUM: &'static str;
    const DEFINITION: &'static str;

    fn to_cdr(&self) -> Vec<u8>;
    fn from_cdr(bytes: &[u8]) -> Result<Self, BridgeError>;
}

/// CDR encapsulation header for little-endian plain CDR.
const CDR_LE_HEADER: [u8; 4] = [0x00, 0x01, 0x00, 0x00];

/// `std_msgs/msg/Float64`, published by the inbound path on latency topics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Float64 {
    pub data: f64,
}

impl RosMessage for Float64 {
    const TYPE_NAME: &'static str = "std_msgs/msg/Float64";
    const MD5SUM: &'static str = "fdb28210bfa9d7c91146260178d9a584";
    const DEFINITION: &'static str = "float64 data";

    fn to_cdr(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&CDR_LE_HEADER);
        out.extend_from_slice(&self.data.to_le_bytes());
        out
    }

    fn from_cdr(bytes: &[u8]) -> Result<Self, BridgeError> {
        let body = bytes
            .strip_prefix(&CDR_LE_HEADER[..])
            .ok_or_else(|| BridgeError::Serialization("missing CDR header".to_string()))?;
        let raw: [u8; 8] = body.try_into().map_err(|_| {
            BridgeError::Serialization(format!("Float64 body must be 8 bytes, got {}", body.len()))
        })?;
        Ok(Self {
            data: f64::from_le_bytes(raw),
        })
    }
}
