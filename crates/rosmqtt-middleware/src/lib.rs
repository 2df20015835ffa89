//! `rosmqtt-middleware` – the robotics bus side of the bridge.
//!
//! Routes serialized messages between publishers and subscribers without
//! caring about their meaning.
//!
//! # Modules
//!
//! - [`adapter`] – [`MessageBus`] and [`GenericPublisher`], the type-erased
//!   interface the bridge consumes.
//! - [`bus`] – [`RosBus`], an in-process topic bus built on Tokio broadcast
//!   channels with queue depth and latching.

pub mod adapter;
pub mod bus;

pub use adapter::{
    GenericPublisher, MessageBus, MessageCallback, PublisherOptions, SubscriptionHandle,
};
pub use bus::{RosBus, TopicReceiver};
