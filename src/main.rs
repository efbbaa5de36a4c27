//! # ARPANSA UV Main Application Entry Point
//!
//! Parses command-line arguments, initializes tracing and runs the server
//! until Ctrl-C is received.
//!
//! - First argument: Port number (defaults to 3000)
//! - Second argument: Path to the entry store (defaults to "arpansa_uv.json5")
//! - Third argument: URL of the UV feed (defaults to the public ARPANSA feed)
//!
//! ## Example Usage
//!
//! ```bash
//! # Run with default settings
//! cargo run
//!
//! # Run on a specific port with a specific entry store
//! cargo run 8080 my-entries.json5
//!
//! # Poll a mirror of the feed
//! cargo run 8080 my-entries.json5 http://mirror.local/uvvalues.xml
//! ```
//!
//! Log levels can be controlled through the `RUST_LOG` environment variable.

use arpansa_uv::error::ArpansaError;
use arpansa_uv::server;
use std::env;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), ArpansaError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(3000);

    let config_file_path = env::args().nth(2).map(PathBuf::from);
    let feed_url = env::args().nth(3);

    tracing::info!("Starting ARPANSA UV service");

    let cancel_token = CancellationToken::new();
    tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
                return;
            }
            tracing::info!("Shutdown signal received");
            cancel_token.cancel();
        }
    });

    server::run(port, config_file_path, feed_url, cancel_token).await?;

    tracing::info!("ARPANSA UV service shutting down");
    Ok(())
}
