//! Command-line argument parsing for herald-server

use clap::Parser;
use std::path::PathBuf;

use crate::config::ServerConfig;

/// herald-server - real-time notification hub
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to the XDG config location)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Unix socket path to listen on
    ///
    /// Overrides listen.socket_path from the config file.
    #[arg(long, short = 'S', env = "HERALD_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Also listen on TCP at host:port
    ///
    /// Example: --tcp 127.0.0.1:7070
    #[arg(long)]
    pub tcp: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded config
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(socket) = &self.socket {
            config.listen.socket_path = Some(socket.clone());
        }
        if let Some(tcp) = &self.tcp {
            config.listen.tcp_addr = Some(tcp.clone());
        }
    }
}
