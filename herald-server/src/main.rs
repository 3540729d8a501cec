//! herald-server binary

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use herald_server::cli::Args;
use herald_server::{serve, ConfigLoader, Hub, Listeners};
use herald_utils::{init_logging_with_config, LogConfig, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging_with_config(LogConfig::server())?;

    let mut config = ConfigLoader::load_optional(args.config.as_deref())?;
    args.apply(&mut config);
    ConfigLoader::validate(&config)?;

    info!("herald server starting");

    let listeners = match Listeners::bind(&config.listen).await {
        Ok(listeners) => listeners,
        Err(e) => {
            error!("Failed to start listeners: {}", e);
            return Err(e);
        }
    };

    let hub = Arc::new(Hub::new(config));

    let signal_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_hub.shutdown();
        }
    });

    serve(hub, listeners).await;

    info!("herald server stopped");
    Ok(())
}
