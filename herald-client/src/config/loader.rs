//! Configuration loader

use std::path::Path;

use herald_utils::{config_file, HeraldError, Result};

use super::ClientConfig;
use crate::connection::ServerAddr;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<ClientConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(ClientConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<ClientConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| HeraldError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<ClientConfig> {
        toml::from_str(content).map_err(|e| HeraldError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &ClientConfig) -> Result<()> {
        if let Some(addr) = &config.server.addr {
            ServerAddr::parse(addr).map_err(|e| HeraldError::config(e.to_string()))?;
        }

        let reconnect = &config.reconnect;
        if reconnect.max_attempts == 0 {
            return Err(HeraldError::config("reconnect.max_attempts must be at least 1"));
        }
        if reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(HeraldError::config(
                "reconnect.initial_delay_ms must not exceed reconnect.max_delay_ms",
            ));
        }

        if config.outbound_buffer == 0 {
            return Err(HeraldError::config("outbound_buffer must be at least 1"));
        }

        Ok(())
    }

    /// Load from `path` if given, otherwise from the default location
    pub fn load_optional(path: Option<&Path>) -> Result<ClientConfig> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<ClientConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }
}
