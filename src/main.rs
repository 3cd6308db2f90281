//! Signaling relay binary entry point.
//!
//! Starts the relay with configuration loaded from an optional TOML file
//! and overridable `--host`/`--port` flags.

use std::path::PathBuf;

use signal_relay::config::Config;
use signal_relay::SignalingRelay;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut config = match get_arg(&args, "--config").map(PathBuf::from) {
        Some(path) => match Config::from_toml_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to read config file '{}': {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(host) = get_arg(&args, "--host") {
        config.host = host;
    }
    if let Some(port) = get_arg(&args, "--port") {
        match port.parse::<u16>() {
            Ok(port) => config.port = port,
            Err(e) => {
                eprintln!("invalid --port '{port}': {e}");
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging_level.clone())),
        )
        .init();

    let relay = SignalingRelay::new(config);
    if let Err(e) = relay.run().await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}

/// Extract the value following a `--key` argument.
fn get_arg(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
