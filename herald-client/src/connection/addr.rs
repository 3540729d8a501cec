//! Server address parsing

use std::fmt;
use std::os::unix::fs::FileTypeExt;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use url::Url;

use herald_utils::{socket_path, HeraldError, Result};

/// Trait alias for streams that can be used with Framed
pub trait StreamTrait: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamTrait for T {}

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddr {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl ServerAddr {
    /// Parse `unix:///path`, `tcp://host:port`, or a bare socket path
    pub fn parse(addr: &str) -> Result<Self> {
        if addr.starts_with("tcp://") {
            let url = Url::parse(addr).map_err(|e| {
                HeraldError::Connection(format!("Invalid TCP URL '{}': {}", addr, e))
            })?;
            let host = url
                .host_str()
                .ok_or_else(|| HeraldError::connection("Missing host in TCP URL"))?;
            let port = url
                .port()
                .ok_or_else(|| HeraldError::connection("Missing port in TCP URL"))?;

            Ok(Self::Tcp {
                host: host.to_string(),
                port,
            })
        } else if addr.starts_with("unix://") {
            let url = Url::parse(addr)
                .map_err(|e| HeraldError::Connection(format!("Invalid Unix URL: {}", e)))?;
            Ok(Self::Unix(PathBuf::from(url.path())))
        } else if let Some((scheme, _)) = addr.split_once("://") {
            Err(HeraldError::Connection(format!(
                "Unsupported address scheme '{}'",
                scheme
            )))
        } else {
            Ok(Self::Unix(PathBuf::from(addr)))
        }
    }

    /// Open a stream to the server
    pub async fn connect(&self) -> Result<Box<dyn StreamTrait>> {
        match self {
            Self::Tcp { host, port } => {
                let addr = format!("{}:{}", host, port);
                let stream = TcpStream::connect(&addr).await.map_err(|e| {
                    HeraldError::Connection(format!("Failed to connect to {}: {}", addr, e))
                })?;
                Ok(Box::new(stream))
            }
            Self::Unix(path) => {
                let Ok(meta) = std::fs::metadata(path) else {
                    return Err(HeraldError::ServerNotRunning { path: path.clone() });
                };
                if !meta.file_type().is_socket() {
                    return Err(HeraldError::config(format!(
                        "{} is not a socket",
                        path.display()
                    )));
                }

                let stream = UnixStream::connect(path).await.map_err(|e| {
                    HeraldError::Connection(format!(
                        "Failed to connect to {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl Default for ServerAddr {
    fn default() -> Self {
        Self::Unix(socket_path())
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::net::UnixListener;

    #[test]
    fn test_parse_tcp() {
        let addr = ServerAddr::parse("tcp://127.0.0.1:7070").unwrap();
        assert_eq!(
            addr,
            ServerAddr::Tcp {
                host: "127.0.0.1".into(),
                port: 7070
            }
        );
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:7070");
    }

    #[test]
    fn test_parse_tcp_missing_port() {
        assert!(ServerAddr::parse("tcp://localhost").is_err());
    }

    #[test]
    fn test_parse_unix_url_and_bare_path() {
        assert_eq!(
            ServerAddr::parse("unix:///tmp/herald.sock").unwrap(),
            ServerAddr::Unix(PathBuf::from("/tmp/herald.sock"))
        );
        assert_eq!(
            ServerAddr::parse("/tmp/herald.sock").unwrap(),
            ServerAddr::Unix(PathBuf::from("/tmp/herald.sock"))
        );
    }

    #[test]
    fn test_parse_unknown_scheme() {
        assert!(ServerAddr::parse("ws://localhost:80").is_err());
    }

    #[tokio::test]
    async fn test_connect_missing_socket() {
        let addr = ServerAddr::Unix("/nonexistent/herald.sock".into());
        assert!(matches!(
            addr.connect().await,
            Err(HeraldError::ServerNotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_unix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        ServerAddr::Unix(path).connect().await.unwrap();
        accept.await.unwrap();
    }
}
