//! `rosmqtt-types` – shared vocabulary of the ROS/MQTT bridge.
//!
//! # Modules
//!
//! - [`message`] – [`TypeIdentity`] and [`SerializedMessage`], the
//!   type-erased form in which bus messages travel through the bridge, plus
//!   the [`RosMessage`] trait and the builtin [`Float64`] used for latency
//!   output.
//! - [`stamp`] – [`Stamp`], a ROS time value with a fixed 8-byte wire form.
//! - [`registry`] – [`TypeRegistry`], fingerprint-keyed lookup of known
//!   message types.

pub mod message;
pub mod registry;
pub mod stamp;

pub use message::{Float64, RosMessage, SerializedMessage, TypeIdentity};
pub use registry::TypeRegistry;
pub use stamp::Stamp;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type shared by every crate of the bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Malformed type metadata: {0}")]
    MalformedTypeInfo(String),

    #[error("No route configured for topic '{0}'")]
    UnknownRoute(String),

    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
