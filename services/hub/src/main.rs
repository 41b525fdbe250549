// hub: standalone statebus state server.
//
// Binds both channels, prints the discovery variables as KEY=VALUE lines
// (and optionally writes them to a file), then serves until a client sends
// a shutdown request or the process is interrupted.

use clap::Parser;
use hub::{HandlerRegistry, Hub, HubConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "hub", version, about = "Shared observable state hub for local worker pools")]
struct Args {
    /// TOML config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the reply-channel bind address (e.g. 127.0.0.1:4441).
    #[arg(long)]
    reply_bind: Option<String>,
    /// Override the events-channel bind address.
    #[arg(long)]
    events_bind: Option<String>,
    /// Also write the discovery variables to this file as KEY=VALUE lines.
    #[arg(long)]
    endpoints_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "hub starting");

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => match HubConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => HubConfig::default(),
    };
    if let Some(bind) = args.reply_bind {
        config.reply_bind = bind;
    }
    if let Some(bind) = args.events_bind {
        config.events_bind = bind;
    }

    // The standalone binary serves state operations only; embedders that
    // need atomic handlers start the hub through the library instead.
    let mut hub = match Hub::start(config, HandlerRegistry::new()).await {
        Ok(hub) => hub,
        Err(e) => {
            eprintln!("FATAL: failed to start hub: {e}");
            std::process::exit(1);
        }
    };

    let mut lines = String::new();
    for (name, value) in hub.env_pairs() {
        println!("{name}={value}");
        lines.push_str(&format!("{name}={value}\n"));
    }
    if let Some(path) = &args.endpoints_file {
        if let Err(e) = std::fs::write(path, &lines) {
            eprintln!("FATAL: failed to write endpoints file: {e}");
            std::process::exit(1);
        }
    }

    tokio::select! {
        _ = hub.closed() => {
            info!("hub shut down by client request");
            return;
        }
        _ = tokio::signal::ctrl_c() => {}
    }
    info!("interrupt received; shutting down");
    hub.shutdown().await;
}
