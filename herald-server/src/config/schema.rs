//! Configuration schema structs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use herald_protocol::MAX_FRAME_SIZE;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub peers: PeerConfig,
}

/// Where the server accepts connections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenConfig {
    /// Unix socket path; `None` disables the Unix listener
    pub socket_path: Option<PathBuf>,
    /// `host:port` for the optional TCP listener
    pub tcp_addr: Option<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            socket_path: Some(herald_utils::socket_path()),
            tcp_addr: None,
        }
    }
}

/// Per-peer connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PeerConfig {
    /// Messages queued for a peer before new ones are dropped
    pub outbound_buffer: usize,
    /// Largest frame accepted from or sent to a peer
    pub max_frame_bytes: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            max_frame_bytes: MAX_FRAME_SIZE,
        }
    }
}
