//! Configuration loader

use std::path::Path;

use herald_protocol::MAX_FRAME_SIZE;
use herald_utils::{config_file, HeraldError, Result};

use super::ServerConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<ServerConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(ServerConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<ServerConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| HeraldError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<ServerConfig> {
        toml::from_str(content).map_err(|e| HeraldError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &ServerConfig) -> Result<()> {
        if config.listen.socket_path.is_none() && config.listen.tcp_addr.is_none() {
            return Err(HeraldError::config(
                "at least one of listen.socket_path or listen.tcp_addr must be set",
            ));
        }

        if let Some(addr) = &config.listen.tcp_addr {
            if addr.rsplit_once(':').map_or(true, |(host, _)| host.is_empty()) {
                return Err(HeraldError::config(format!(
                    "listen.tcp_addr must be host:port, got {:?}",
                    addr
                )));
            }
        }

        if config.peers.outbound_buffer == 0 {
            return Err(HeraldError::config("peers.outbound_buffer must be at least 1"));
        }

        if config.peers.max_frame_bytes == 0 || config.peers.max_frame_bytes > MAX_FRAME_SIZE {
            return Err(HeraldError::config(format!(
                "peers.max_frame_bytes must be between 1 and {}",
                MAX_FRAME_SIZE
            )));
        }

        Ok(())
    }

    /// Load from `path` if given, otherwise from the default location
    pub fn load_optional(path: Option<&Path>) -> Result<ServerConfig> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<ServerConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(ConfigLoader::validate(&config).is_ok());
        assert_eq!(config.peers.outbound_buffer, 256);
        assert!(config.listen.socket_path.is_some());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(
            &path,
            r#"
            [listen]
            socket_path = "/tmp/herald-test.sock"
            tcp_addr = "127.0.0.1:7070"

            [peers]
            outbound_buffer = 8
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(
            config.listen.socket_path,
            Some(PathBuf::from("/tmp/herald-test.sock"))
        );
        assert_eq!(config.listen.tcp_addr.as_deref(), Some("127.0.0.1:7070"));
        assert_eq!(config.peers.outbound_buffer, 8);
        assert_eq!(config.peers.max_frame_bytes, MAX_FRAME_SIZE);
    }

    #[test]
    fn test_load_from_missing_path() {
        let dir = tempdir().unwrap();
        let result = ConfigLoader::load_from_path(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(HeraldError::FileRead { .. })));
    }

    #[test]
    fn test_validate_zero_buffer() {
        let mut config = ServerConfig::default();
        config.peers.outbound_buffer = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_needs_a_listener() {
        let mut config = ServerConfig::default();
        config.listen.socket_path = None;
        assert!(ConfigLoader::validate(&config).is_err());

        config.listen.tcp_addr = Some("127.0.0.1:0".into());
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_bad_tcp_addr() {
        let mut config = ServerConfig::default();
        config.listen.tcp_addr = Some("7070".into());
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_frame_ceiling() {
        let mut config = ServerConfig::default();
        config.peers.max_frame_bytes = MAX_FRAME_SIZE + 1;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::parse("invalid { toml", Path::new("test.toml"));
        assert!(matches!(result, Err(HeraldError::ConfigInvalid { .. })));
    }
}
