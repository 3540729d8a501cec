//! Access control seam for peer traffic
//!
//! Authentication and session handling live outside the hub. Whatever owns
//! them plugs in here as an [`AccessGate`].

use herald_broker::SubscriptionId;

/// Decides which actions a peer may publish and receive
pub trait AccessGate: Send + Sync {
    /// Inbound frames from `peer` carrying `action` are dropped when false
    fn may_send(&self, peer: SubscriptionId, action: &str) -> bool;

    /// Forwarding `action` to `peer` is skipped when false
    fn may_receive(&self, peer: SubscriptionId, action: &str) -> bool;
}

/// Gate that lets everything through
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl AccessGate for OpenGate {
    fn may_send(&self, _peer: SubscriptionId, _action: &str) -> bool {
        true
    }

    fn may_receive(&self, _peer: SubscriptionId, _action: &str) -> bool {
        true
    }
}
