//! The bus-side seam of the bridge.
//!
//! The bridge never speaks to a concrete middleware.  It advertises
//! publishers and subscribes through [`MessageBus`], handing over
//! type-erased [`SerializedMessage`] values whose type is only known at
//! runtime.
//!
//! # Overview
//!
//! - [`MessageBus`] – the trait a bus implementation must provide.
//! - [`GenericPublisher`] – a publisher advertised for a runtime-supplied
//!   [`TypeIdentity`].
//! - [`SubscriptionHandle`] – keeps a callback subscription alive; dropping
//!   it unsubscribes.
//! - [`RosBus`][crate::bus::RosBus] – the in-process implementation.

use std::fmt;
use std::sync::Arc;

use rosmqtt_types::{BridgeError, SerializedMessage, TypeIdentity};

/// Callback invoked by the bus for every message on a subscribed topic.
///
/// Invoked on a thread owned by the bus implementation.
pub type MessageCallback = Box<dyn Fn(SerializedMessage) + Send + Sync + 'static>;

/// Publisher settings for [`MessageBus::advertise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherOptions {
    /// Number of messages buffered for slow subscribers.
    pub queue_size: usize,
    /// Whether the last message is replayed to late subscribers.
    pub latched: bool,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            queue_size: 1,
            latched: false,
        }
    }
}

/// A publisher whose message type was supplied at runtime.
pub trait GenericPublisher: Send + Sync {
    fn topic(&self) -> &str;

    fn type_identity(&self) -> &Arc<TypeIdentity>;

    /// Publish already serialized bytes of [`GenericPublisher::type_identity`].
    ///
    /// Returns the number of subscribers the message was handed to; zero
    /// subscribers is not an error.
    fn publish(&self, data: Vec<u8>) -> Result<usize, BridgeError>;
}

/// Every bus implementation must implement this trait.
///
/// # Contract
///
/// * `advertise` – creates a publisher for `type_identity` on `topic`.  A
///   topic carries one type; advertising a different type on a typed topic
///   is an error.
/// * `subscribe` – delivers every message on `topic` to `callback` until the
///   returned handle is dropped.
/// * `topic_type` – the type currently carried by `topic`, if any publisher
///   has advertised it.
/// * `resolve_type` – the full identity registered for a fingerprint.
pub trait MessageBus: Send + Sync {
    fn advertise(
        &self,
        topic: &str,
        type_identity: TypeIdentity,
        options: PublisherOptions,
    ) -> Result<Arc<dyn GenericPublisher>, BridgeError>;

    fn subscribe(
        &self,
        topic: &str,
        queue_size: usize,
        callback: MessageCallback,
    ) -> Result<SubscriptionHandle, BridgeError>;

    fn topic_type(&self, topic: &str) -> Option<Arc<TypeIdentity>>;

    fn resolve_type(&self, md5: &str) -> Option<Arc<TypeIdentity>>;
}

/// Live subscription.  Dropping the handle cancels the subscription.
pub struct SubscriptionHandle {
    topic: String,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandle {
    /// Handle that runs `cancel` when dropped.
    pub fn new(topic: impl Into<String>, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            topic: topic.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle with nothing to cancel.
    pub fn detached(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            cancel: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}
