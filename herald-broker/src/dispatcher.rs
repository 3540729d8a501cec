//! Dispatcher
//!
//! Outbound: `publish` hands a [`Message`] to the [`Transport`] if it is
//! open. Inbound: frames are decoded and fanned out to a snapshot of the
//! registry, filtered per subscription. Nothing here returns an error to the
//! caller; failures become log lines and counters.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::registry::{SubscriberRegistry, SubscriptionId};
use crate::subscriber::SubscriberError;
use herald_protocol::{Message, RawFrame};

/// Outbound side of a broker
///
/// `send` must not block: either the message is queued for the wire or it
/// is dropped and `false` is returned.
pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;

    fn send(&self, message: Message) -> bool;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn send(&self, message: Message) -> bool {
        (**self).send(message)
    }
}

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscriptions whose filter matched (origin excluded)
    pub matched: usize,
    /// Handlers that accepted the message
    pub delivered: usize,
    /// Handlers that errored or panicked
    pub failed: usize,
}

/// Fan `message` out to every matching subscription in a snapshot of
/// `registry`, skipping `origin`.
pub fn notify_subscribers(
    registry: &SubscriberRegistry,
    message: &Message,
    origin: Option<SubscriptionId>,
) -> DeliveryReport {
    let snapshot = registry.snapshot();
    let mut report = DeliveryReport::default();

    for subscription in snapshot.iter() {
        if Some(subscription.id()) == origin || !subscription.matches(&message.action) {
            continue;
        }
        report.matched += 1;

        let outcome = catch_unwind(AssertUnwindSafe(|| subscription.deliver(message)))
            .unwrap_or_else(|payload| Err(SubscriberError::Panicked(panic_message(payload))));

        match outcome {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    id = %subscription.id(),
                    action = %message.action,
                    error = %e,
                    "Subscriber failed during dispatch"
                );
            }
        }
    }

    debug!(
        action = %message.action,
        subscribers = snapshot.len(),
        matched = report.matched,
        delivered = report.delivered,
        failed = report.failed,
        "Dispatched message"
    );

    report
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Publishes through a transport and dispatches into a registry
pub struct Dispatcher<T> {
    registry: Arc<SubscriberRegistry>,
    transport: T,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(registry: Arc<SubscriberRegistry>, transport: T) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Send `{action, data}` if the transport is open. Never queues.
    pub fn publish(&self, action: &str, payload: Value) -> bool {
        if !self.transport.is_open() {
            debug!(action, "Publish dropped, connection not open");
            return false;
        }

        let sent = self.transport.send(Message::new(action, payload));
        if !sent {
            warn!(action, "Transport refused message");
        }
        sent
    }

    /// Decode an inbound frame and dispatch it.
    ///
    /// Malformed frames are logged and dropped; `None` is returned.
    pub fn on_inbound(
        &self,
        raw: RawFrame,
        origin: Option<SubscriptionId>,
    ) -> Option<DeliveryReport> {
        let size = raw.body_len();
        match raw.decode() {
            Ok(message) => Some(self.notify_subscribers(&message, origin)),
            Err(e) => {
                warn!(?origin, ?size, error = %e, "Dropping malformed frame");
                None
            }
        }
    }

    pub fn notify_subscribers(
        &self,
        message: &Message,
        origin: Option<SubscriptionId>,
    ) -> DeliveryReport {
        notify_subscribers(&self.registry, message, origin)
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
