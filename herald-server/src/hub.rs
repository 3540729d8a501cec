//! Server hub
//!
//! Owns the registry every peer and local handler subscribes into, the
//! server's [`ConnectionState`], the shutdown broadcast and the access gate.
//! A publish on the hub is a local fan-out: it reaches local handlers and,
//! through their [`PeerForwarder`](crate::acceptor::PeerForwarder)s, every
//! connected peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use herald_broker::{
    notify_subscribers, Broker, ConnectionState, DeliveryReport, Subscriber, SubscriberRegistry,
    SubscriptionId, Transport,
};
use herald_protocol::{Message, RawFrame};

use crate::config::ServerConfig;
use crate::gate::{AccessGate, OpenGate};

/// Transport for the hub: sending is dispatching into the registry
pub struct LocalFanout {
    registry: Arc<SubscriberRegistry>,
    state: watch::Receiver<ConnectionState>,
}

impl Transport for LocalFanout {
    fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    fn send(&self, message: Message) -> bool {
        notify_subscribers(&self.registry, &message, None);
        true
    }
}

pub struct Hub {
    broker: Broker<LocalFanout>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
    gate: Arc<dyn AccessGate>,
    config: ServerConfig,
}

impl Hub {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_gate(config, Arc::new(OpenGate))
    }

    pub fn with_gate(config: ServerConfig, gate: Arc<dyn AccessGate>) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = broadcast::channel(1);

        let transport = LocalFanout {
            registry: Arc::clone(&registry),
            state: state_rx,
        };

        Self {
            broker: Broker::with_registry(registry, transport),
            state_tx,
            shutdown_tx,
            shut_down: AtomicBool::new(false),
            gate,
            config,
        }
    }

    // ==================== Public API ====================

    pub fn subscribe<S>(&self, handler: S, actions: Option<Vec<String>>) -> SubscriptionId
    where
        S: Subscriber + 'static,
    {
        self.broker.subscribe(handler, actions)
    }

    pub fn subscribe_actions<S, I, A>(&self, actions: I, handler: S) -> SubscriptionId
    where
        S: Subscriber + 'static,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.broker.subscribe_actions(actions, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId, actions: Option<&[&str]>) -> bool {
        self.broker.unsubscribe(id, actions)
    }

    /// Deliver `{action, data}` to every matching local handler and peer.
    ///
    /// Returns `false` while the hub is not accepting connections.
    pub fn publish(&self, action: &str, payload: Value) -> bool {
        self.broker.publish(action, payload)
    }

    pub fn is_connection_open(&self) -> bool {
        self.broker.is_connection_open()
    }

    // ==================== Lifecycle ====================

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!(from = %current, to = %state, "Hub state changed");
            *current = state;
            true
        });
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop accepting and close every peer
    pub fn shutdown(&self) {
        info!("Hub shutdown requested");
        // Flag first: a receiver subscribed after the send still sees it
        self.shut_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    // ==================== Peer traffic ====================

    /// Dispatch a frame read from `peer` to everyone but `peer`
    pub fn dispatch_from(&self, peer: SubscriptionId, raw: RawFrame) -> Option<DeliveryReport> {
        let size = raw.body_len();
        let message = match raw.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, ?size, error = %e, "Dropping malformed frame");
                return None;
            }
        };

        if !self.gate.may_send(peer, &message.action) {
            warn!(%peer, action = %message.action, "Peer may not send action, dropping");
            return None;
        }

        debug!(%peer, action = %message.action, "Frame from peer");
        Some(self.broker.notify_local(&message, Some(peer)))
    }

    /// Publish a synthetic `{id}` event about `peer`, skipping `except`
    pub(crate) fn announce(
        &self,
        action: &str,
        peer: SubscriptionId,
        except: Option<SubscriptionId>,
    ) -> DeliveryReport {
        let message = Message::new(action, json!({ "id": peer.value() }));
        self.broker.notify_local(&message, except)
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        self.broker.registry()
    }

    pub fn gate(&self) -> &Arc<dyn AccessGate> {
        &self.gate
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
