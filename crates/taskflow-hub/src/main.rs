//! taskflow-hub: WebSocket hub for voice presence, WebRTC signaling, and
//! chat event fanout.
//!
//! Clients identify with a `hello` frame, then join voice channels,
//! exchange offer/answer/ICE envelopes addressed by connection handle, and
//! subscribe to chat channels. Audio flows peer to peer; the hub only
//! carries control traffic.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use taskflow_config::validation::validate;
use taskflow_config::{load_config, load_from_path, HubConfig};
use taskflow_hub::{server, Hub};

#[derive(Parser)]
#[command(name = "taskflow-hub", about = "Presence, signaling and chat event hub")]
struct Args {
    /// Path to a TOML config file. Defaults to the platform config dir.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on. Overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,
}

fn load(args: &Args) -> Result<HubConfig, taskflow_common::ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_from_path(path)?,
        None => load_config()?,
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    validate(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("taskflow-hub: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .init();

    let listener = match server::bind(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Failed to bind TCP listener");
            std::process::exit(1);
        }
    };

    let hub = Hub::start(&config);
    let hello_timeout = Duration::from_secs(config.server.hello_timeout_secs);
    server::serve(listener, hub, hello_timeout).await;
}
