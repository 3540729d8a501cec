//! herald client binary

use clap::Parser;
use tracing::info;

use herald_broker::{callback, ConnectionState};
use herald_client::cli::{parse_payload, Args, Command};
use herald_client::{Client, ConfigLoader};
use herald_utils::{init_logging_with_config, HeraldError, LogConfig, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging_with_config(LogConfig::client())?;

    let mut config = ConfigLoader::load_optional(args.config.as_deref())?;
    if let Some(addr) = &args.addr {
        config.server.addr = Some(addr.clone());
    }
    ConfigLoader::validate(&config)?;

    let client = Client::new(&config)?;

    match &args.command {
        Command::Listen { .. } => {
            client.subscribe(
                callback(|msg| match serde_json::to_string(msg) {
                    Ok(line) => println!("{}", line),
                    Err(e) => eprintln!("failed to encode message: {}", e),
                }),
                args.command.filter(),
            );

            client.connect();
            client.wait_connected().await?;
            info!(addr = %client.manager().addr(), "Listening");

            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = client.wait_for_state(ConnectionState::Failed) => {
                    return Err(HeraldError::ReconnectExhausted {
                        attempts: config.reconnect.max_attempts,
                    });
                }
            }
            client.close().await;
        }
        Command::Publish { action, data } => {
            let payload = parse_payload(data)?;

            client.connect();
            client.wait_connected().await?;

            let sent = client.publish(action, payload);
            client.close().await;
            if !sent {
                return Err(HeraldError::connection("message was not sent"));
            }
        }
    }

    Ok(())
}
