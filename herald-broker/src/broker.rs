//! Broker facade: the public publish/subscribe API over one registry,
//! one dispatcher and one transport.

use std::sync::Arc;

use serde_json::Value;

use crate::dispatcher::{DeliveryReport, Dispatcher, Transport};
use crate::registry::{SubscriberRegistry, SubscriptionId};
use crate::subscriber::Subscriber;
use herald_protocol::{Message, RawFrame};

pub struct Broker<T> {
    dispatcher: Dispatcher<T>,
}

impl<T: Transport> Broker<T> {
    /// Broker with a fresh registry
    pub fn new(transport: T) -> Self {
        Self::with_registry(Arc::new(SubscriberRegistry::new()), transport)
    }

    pub fn with_registry(registry: Arc<SubscriberRegistry>, transport: T) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry, transport),
        }
    }

    /// Register `handler`; `actions` restricts which actions it receives
    pub fn subscribe<S>(&self, handler: S, actions: Option<Vec<String>>) -> SubscriptionId
    where
        S: Subscriber + 'static,
    {
        self.dispatcher.registry().subscribe(Arc::new(handler), actions)
    }

    /// [`subscribe`](Self::subscribe) with the filter first
    pub fn subscribe_actions<S, I, A>(&self, actions: I, handler: S) -> SubscriptionId
    where
        S: Subscriber + 'static,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let actions = actions.into_iter().map(Into::into).collect();
        self.subscribe(handler, Some(actions))
    }

    /// Remove a subscription, or with `actions`, narrow its filter
    pub fn unsubscribe(&self, id: SubscriptionId, actions: Option<&[&str]>) -> bool {
        self.dispatcher.registry().unsubscribe(id, actions)
    }

    pub fn publish(&self, action: &str, payload: Value) -> bool {
        self.dispatcher.publish(action, payload)
    }

    pub fn is_connection_open(&self) -> bool {
        self.dispatcher.transport().is_open()
    }

    /// Deliver an inbound frame to local subscribers
    pub fn on_inbound(
        &self,
        raw: RawFrame,
        origin: Option<SubscriptionId>,
    ) -> Option<DeliveryReport> {
        self.dispatcher.on_inbound(raw, origin)
    }

    /// Deliver a message to local subscribers without touching the transport
    pub fn notify_local(&self, message: &Message, origin: Option<SubscriptionId>) -> DeliveryReport {
        self.dispatcher.notify_subscribers(message, origin)
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        self.dispatcher.registry()
    }

    pub fn transport(&self) -> &T {
        self.dispatcher.transport()
    }
}
