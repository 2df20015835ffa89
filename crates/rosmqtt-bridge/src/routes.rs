//! Route tables.
//!
//! Routes are built once from the configuration and never added or removed
//! afterwards, so a [`RouteTable`] is an immutable map.  The few fields that
//! change at runtime (subscription handle, announced type, publishers) live
//! behind a per-route lock, and every read-modify-write of one route happens
//! under that route's lock only.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rosmqtt_middleware::{GenericPublisher, SubscriptionHandle};
use rosmqtt_types::{BridgeError, TypeIdentity};

use crate::config::{Mqtt2RosConfig, Ros2MqttConfig};

/// Immutable map from a route key to its route.
#[derive(Debug)]
pub struct RouteTable<R> {
    entries: BTreeMap<String, R>,
}

impl<R> RouteTable<R> {
    /// Build the table, rejecting duplicate keys.
    pub fn build(routes: impl IntoIterator<Item = (String, R)>) -> Result<Self, BridgeError> {
        let mut entries = BTreeMap::new();
        for (key, route) in routes {
            if entries.contains_key(&key) {
                return Err(BridgeError::Config(format!("duplicate route for topic '{key}'")));
            }
            entries.insert(key, route);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&R> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &R)> {
        self.entries.iter().map(|(key, route)| (key.as_str(), route))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Bus → broker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OutboundState {
    subscription: Option<SubscriptionHandle>,
    subscribed_type: Option<Arc<TypeIdentity>>,
    /// Type whose metadata went out on the current connection.
    announced: Option<Arc<TypeIdentity>>,
}

/// A bus topic forwarded to the broker, keyed by its bus topic.
pub struct OutboundRoute {
    pub config: Ros2MqttConfig,
    state: Mutex<OutboundState>,
}

impl OutboundRoute {
    pub fn new(config: Ros2MqttConfig) -> Self {
        Self {
            config,
            state: Mutex::new(OutboundState::default()),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscription.is_some()
    }

    /// Type the bus reported when the subscription was attached.
    pub fn subscribed_type(&self) -> Option<Arc<TypeIdentity>> {
        self.state.lock().subscribed_type.clone()
    }

    /// Store `handle` unless a subscription is already attached.  Returns
    /// `false` (and drops `handle`) in that case.
    pub(crate) fn attach_subscription(
        &self,
        handle: SubscriptionHandle,
        type_identity: Arc<TypeIdentity>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.subscription.is_some() {
            return false;
        }
        state.subscription = Some(handle);
        state.subscribed_type = Some(type_identity);
        true
    }

    pub(crate) fn detach_subscription(&self) -> Option<SubscriptionHandle> {
        self.state.lock().subscription.take()
    }

    /// Mark `type_identity` as announced.  Returns `true` when the caller
    /// must publish its metadata: nothing was announced on this connection
    /// yet, or the type changed.
    pub(crate) fn claim_announcement(&self, type_identity: &Arc<TypeIdentity>) -> bool {
        let mut state = self.state.lock();
        match &state.announced {
            Some(announced) if announced.same_type(type_identity) => false,
            _ => {
                state.announced = Some(Arc::clone(type_identity));
                true
            }
        }
    }

    pub(crate) fn reset_announcement(&self) {
        self.state.lock().announced = None;
    }

    pub fn announced_type(&self) -> Option<Arc<TypeIdentity>> {
        self.state.lock().announced.clone()
    }
}

// ---------------------------------------------------------------------------
// Broker → bus
// ---------------------------------------------------------------------------

/// Outcome of [`InboundRoute::configure_publisher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherChange {
    /// A publisher with the same fingerprint already existed.
    Unchanged,
    Created,
    /// The fingerprint changed and the publisher was re-advertised.
    Replaced,
}

#[derive(Default)]
struct InboundState {
    publisher: Option<Arc<dyn GenericPublisher>>,
    stamped: bool,
    latency_publisher: Option<Arc<dyn GenericPublisher>>,
}

/// A broker topic forwarded to the bus, keyed by its MQTT topic.
pub struct InboundRoute {
    pub config: Mqtt2RosConfig,
    /// Bus topic receiving the latency of stamped messages.
    pub latency_topic: String,
    state: Mutex<InboundState>,
}

impl InboundRoute {
    pub fn new(config: Mqtt2RosConfig, latency_topic: String) -> Self {
        Self {
            config,
            latency_topic,
            state: Mutex::new(InboundState::default()),
        }
    }

    /// The bus publisher, once metadata for this route has arrived.
    pub fn publisher(&self) -> Option<Arc<dyn GenericPublisher>> {
        self.state.lock().publisher.clone()
    }

    /// Whether the producer announced stamped payloads.
    pub fn is_stamped(&self) -> bool {
        self.state.lock().stamped
    }

    pub fn latency_publisher(&self) -> Option<Arc<dyn GenericPublisher>> {
        self.state.lock().latency_publisher.clone()
    }

    /// Make sure the bus publisher matches `identity`.
    ///
    /// Keeps the existing publisher when its fingerprint matches, otherwise
    /// drops it and advertises a new one through `advertise`.
    pub(crate) fn configure_publisher<F>(
        &self,
        identity: TypeIdentity,
        stamped: bool,
        advertise: F,
    ) -> Result<PublisherChange, BridgeError>
    where
        F: FnOnce(TypeIdentity) -> Result<Arc<dyn GenericPublisher>, BridgeError>,
    {
        let mut state = self.state.lock();
        let unchanged = state
            .publisher
            .as_ref()
            .is_some_and(|existing| existing.type_identity().same_type(&identity));
        if unchanged {
            state.stamped = stamped;
            return Ok(PublisherChange::Unchanged);
        }
        let change = if state.publisher.is_some() {
            PublisherChange::Replaced
        } else {
            PublisherChange::Created
        };
        // The old publisher must be gone before the topic can be re-typed.
        state.publisher = None;
        state.stamped = false;
        let publisher = advertise(identity)?;
        state.publisher = Some(publisher);
        state.stamped = stamped;
        Ok(change)
    }

    /// The latency publisher, created through `create` on first use.
    pub(crate) fn latency_publisher_or_create<F>(
        &self,
        create: F,
    ) -> Result<Arc<dyn GenericPublisher>, BridgeError>
    where
        F: FnOnce() -> Result<Arc<dyn GenericPublisher>, BridgeError>,
    {
        let mut state = self.state.lock();
        if let Some(existing) = &state.latency_publisher {
            return Ok(Arc::clone(existing));
        }
        let publisher = create()?;
        state.latency_publisher = Some(Arc::clone(&publisher));
        Ok(publisher)
    }
}
