//! herald-broker: the publish/subscribe core shared by server and client
//!
//! - [`SubscriberRegistry`] owns subscriptions and allocates their ids
//! - [`Dispatcher`] publishes through a [`Transport`] and fans inbound
//!   messages out to a snapshot of the registry
//! - [`ConnectionState`] is the lifecycle state machine both ends mirror
//! - [`Broker`] bundles the three behind the public API

pub mod broker;
pub mod dispatcher;
pub mod registry;
pub mod state;
pub mod subscriber;

pub use broker::Broker;
pub use dispatcher::{notify_subscribers, DeliveryReport, Dispatcher, Transport};
pub use registry::{Snapshot, SubscriberRegistry, Subscription, SubscriptionId};
pub use state::{ConnectionState, TransportEvent};
pub use subscriber::{callback, CallbackHandler, Subscriber, SubscriberError};

pub use herald_protocol::{Message, RawFrame};
