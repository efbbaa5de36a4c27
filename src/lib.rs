//! # ARPANSA UV Library
//!
//! This library polls the ARPANSA ultraviolet observation feed and exposes
//! every monitoring location as a UV index sensor.
//!
//! ## Overview
//!
//! The library is organized into several modules that handle different aspects of the service:
//!
//! - `feed`: Parses the XML feed into immutable documents of location records
//! - `client`: Fetches the feed and answers lookups against the latest document
//! - `coordinator`: Refreshes the feed on a timer and publishes the results
//! - `sensor`: Turns location records into sensor state
//! - `wizard`: Setup and options steps that create and adjust configuration entries
//! - `hub`: Loads configuration entries and runs one coordinator per entry
//! - `config`: Constants and the persisted entry store
//! - `server`: Runs the web server and manages routes
//! - `index`: Renders the dashboard page
//! - `error`: Defines custom error types for consistent error handling
//! - `utils`: Provides utility functions used throughout the application
//!
//! ## Getting Started
//!
//! ```no_run
//! use arpansa_uv::{config::CONFIG_FILE, server};
//! use std::path::PathBuf;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), arpansa_uv::error::ArpansaError> {
//!     let cancel_token = CancellationToken::new();
//!     let config_path = Some(PathBuf::from(CONFIG_FILE));
//!
//!     server::run(3000, config_path, None, cancel_token).await
//! }
//! ```
//!
//! The feed client can also be used on its own:
//!
//! ```no_run
//! use arpansa_uv::client::{FeedClient, HttpFetcher};
//!
//! # async fn demo() -> arpansa_uv::error::Result<()> {
//! let mut client = FeedClient::new(HttpFetcher::new(reqwest::Client::new()));
//! client.fetch().await?;
//! for record in client.get_all()? {
//!     println!("{}: {:?}", record.id(), record.index());
//! }
//! # Ok(())
//! # }
//! ```

/// Custom error types module
///
/// Defines the `ArpansaError` enum shared by every layer of the service.
pub mod error;

/// Configuration management module
///
/// Holds the integration constants and the JSON5 file store of configuration
/// entries, including watching the file for external edits.
pub mod config;

/// Feed document module
///
/// Schema-less parsing of `location` elements into flat key/value records
/// with typed accessors on top.
pub mod feed;

/// Feed client module
///
/// The `Fetcher` seam for HTTP access and the `FeedClient` that owns the
/// latest parsed document.
pub mod client;

/// Polling coordinator module
pub mod coordinator;

/// Sensor entity module
pub mod sensor;

/// Configuration wizard module
pub mod wizard;

/// Entry lifecycle module
///
/// Sets up, unloads and reloads configuration entries, wiring each one to a
/// coordinator and a set of sensors.
pub mod hub;

/// Index page generation module
pub mod index;

/// Server operations module
///
/// Contains the Axum web server: dashboard, sensor API, server-sent events
/// and the wizard endpoints.
pub mod server;

/// Utility functions module
pub mod utils;
