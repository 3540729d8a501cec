//! herald-client: reconnecting client for the herald hub
//!
//! [`Client`] is the entry point: subscribe handlers, `connect`, publish.
//! Lifecycle changes arrive as `connection:state` messages on the same
//! subscription API.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;

pub use client::Client;
pub use config::{ClientConfig, ConfigLoader, ReconnectPolicy};
pub use connection::{ConnectionManager, ServerAddr};
