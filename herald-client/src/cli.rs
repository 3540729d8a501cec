//! Command-line argument parsing for the herald client
//!
//! Uses clap for argument parsing with derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use herald_utils::{HeraldError, Result};
use serde_json::Value;

/// herald - publish and listen to hub events
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server address (unix:///path, /path, or tcp://host:port)
    ///
    /// Overrides server.addr from the config file.
    #[arg(long, env = "HERALD_ADDR")]
    pub addr: Option<String>,

    /// Configuration file (defaults to the XDG config location)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Print every matching event as one JSON line
    Listen {
        /// Only print these actions (repeatable)
        #[arg(long = "action", short = 'a')]
        actions: Vec<String>,
    },

    /// Publish a single event and exit
    Publish {
        action: String,

        /// JSON payload; bare words are sent as strings
        #[arg(default_value = "null")]
        data: String,
    },
}

impl Command {
    /// Action filter for `listen`, `None` meaning everything
    pub fn filter(&self) -> Option<Vec<String>> {
        match self {
            Command::Listen { actions } if !actions.is_empty() => Some(actions.clone()),
            _ => None,
        }
    }
}

/// Parse a payload argument as JSON, falling back to a plain string
pub fn parse_payload(raw: &str) -> Result<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(_) if !raw.trim_start().starts_with(['{', '[', '"']) => {
            Ok(Value::String(raw.to_string()))
        }
        Err(e) => Err(HeraldError::InvalidMessage(format!(
            "payload is not valid JSON: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listen_with_actions() {
        let args = Args::parse_from(["herald", "listen", "--action", "a", "-a", "b"]);
        assert_eq!(
            args.command,
            Command::Listen {
                actions: vec!["a".into(), "b".into()]
            }
        );
        assert_eq!(args.command.filter(), Some(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_listen_without_actions() {
        let args = Args::parse_from(["herald", "listen"]);
        assert_eq!(args.command.filter(), None);
    }

    #[test]
    fn test_publish_args() {
        let args = Args::parse_from([
            "herald",
            "--addr",
            "tcp://127.0.0.1:7070",
            "publish",
            "user:login",
            r#"{"id": 7}"#,
        ]);
        assert_eq!(args.addr.as_deref(), Some("tcp://127.0.0.1:7070"));
        assert_eq!(
            args.command,
            Command::Publish {
                action: "user:login".into(),
                data: r#"{"id": 7}"#.into()
            }
        );
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(r#"{"id": 7}"#).unwrap(), json!({ "id": 7 }));
        assert_eq!(parse_payload("42").unwrap(), json!(42));
        assert_eq!(parse_payload("hello").unwrap(), json!("hello"));
        assert!(parse_payload("{ broken").is_err());
    }
}
