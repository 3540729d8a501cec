//! Connection lifecycle state machine

use std::fmt;

/// Lifecycle of a broker's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted; only an explicit `connect()` leaves this state
    Failed,
}

/// Events reported by the underlying transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Initial handshake completed
    Connect,
    /// Initial handshake attempt failed; another may follow
    ConnectError(String),
    /// Connection re-established after the given attempt
    Reconnect { attempt: u32 },
    /// A reconnection attempt failed; another may follow
    ReconnectError(String),
    /// Retry budget exhausted
    ReconnectFailed,
    /// Established connection dropped
    Disconnect,
    /// Transport-level error that did not by itself close the connection
    Error(String),
    /// Inbound frame
    Data,
}

impl ConnectionState {
    /// State after the transport reports `event`
    pub fn on_event(self, event: &TransportEvent) -> ConnectionState {
        use ConnectionState::*;

        match (self, event) {
            (Connecting, TransportEvent::Connect) => Connected,
            (Connecting | Reconnecting, TransportEvent::Reconnect { .. }) => Connected,
            (Connected, TransportEvent::Disconnect) => Reconnecting,
            (Connecting | Reconnecting, TransportEvent::ReconnectFailed) => Failed,
            (state, _) => state,
        }
    }

    /// State entered by an explicit `connect()`, if one is allowed from here
    pub fn begin_connect(self) -> Option<ConnectionState> {
        match self {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                Some(ConnectionState::Connecting)
            }
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Connect => f.write_str("connect"),
            TransportEvent::ConnectError(e) => write!(f, "connect-error: {}", e),
            TransportEvent::Reconnect { attempt } => write!(f, "reconnect (attempt {})", attempt),
            TransportEvent::ReconnectError(e) => write!(f, "reconnect-error: {}", e),
            TransportEvent::ReconnectFailed => f.write_str("reconnect-failed"),
            TransportEvent::Disconnect => f.write_str("disconnect"),
            TransportEvent::Error(e) => write!(f, "error: {}", e),
            TransportEvent::Data => f.write_str("data"),
        }
    }
}
