//! Client-server connection management
//!
//! Resolves the server address, owns the socket, and keeps it alive with
//! bounded exponential backoff.

mod addr;
mod manager;

pub use addr::{ServerAddr, StreamTrait};
pub use manager::ConnectionManager;
