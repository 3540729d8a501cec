//! herald-server: the notification hub
//!
//! A [`Hub`] owns the subscriber registry; the [`acceptor`] turns every
//! accepted connection into a subscription in it.

pub mod acceptor;
pub mod cli;
pub mod config;
pub mod gate;
pub mod hub;

pub use acceptor::{serve, Listeners, PeerConnection, PeerForwarder, PeerState};
pub use config::{ConfigLoader, ServerConfig};
pub use gate::{AccessGate, OpenGate};
pub use hub::{Hub, LocalFanout};
