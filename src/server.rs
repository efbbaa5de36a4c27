use crate::client::{Fetcher, HttpFetcher};
use crate::config::{watch_config_file, ConfigEntry, ConfigStore, ARPANSA_URL, CONFIG_FILE};
use crate::error::{ArpansaError, Result};
use crate::hub::Hub;
use crate::index::generate_index;
use crate::sensor::SensorState;
use crate::wizard::{ConfigFlow, FlowResult, FormSchema, OptionsFlow, UserInput, ERROR_BASE, ERROR_UNKNOWN};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{delete, get, post},
    Router,
};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

/// Build the application router around a hub.
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/", get(generate_index))
        .route("/api/sensors", get(list_sensors))
        .route("/api/sensors/stream", get(sensor_stream))
        .route("/api/flow/:step", get(show_flow).post(submit_flow))
        .route("/api/entries", get(list_entries))
        .route("/api/entries/:name", delete(remove_entry))
        .route("/api/entries/:name/refresh", post(refresh_entry))
        .route(
            "/api/entries/:name/options/:step",
            get(show_options).post(submit_options),
        )
        .nest_service("/static", ServeDir::new("static"))
        .with_state(hub)
}

/// Run the web server on the specified port.
///
/// # Arguments
///
/// * `port` - The port number to bind the server to
/// * `config_path` - Entry store location, defaults to [`CONFIG_FILE`]
/// * `feed_url` - Feed location, defaults to [`ARPANSA_URL`]
/// * `cancel_token` - Cancelling it shuts the server and all polling down
///
/// # Errors
///
/// Returns an error if:
/// - The configuration file cannot be read or created
/// - The feed URL is not an absolute http(s) URL
/// - The address string cannot be parsed into a valid `SocketAddr`
/// - The server fails to bind to the specified address
pub async fn run(
    port: u16,
    config_path: Option<PathBuf>,
    feed_url: Option<String>,
    cancel_token: CancellationToken,
) -> Result<()> {
    tracing::info!("Initializing server");

    let config_path = config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let store = Arc::new(ConfigStore::open(config_path)?);
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(reqwest::Client::new()));
    let hub = Hub::new(fetcher, store, cancel_token.child_token())
        .with_feed_url(feed_url.as_deref().unwrap_or(ARPANSA_URL))?;
    tracing::info!("Polling UV feed at {}", hub.feed_url());
    let hub = Arc::new(hub);

    serve(port, hub, cancel_token).await
}

/// Load every stored entry, watch the config file and serve until cancelled.
///
/// # Errors
///
/// Returns an error if entries cannot be loaded or the server cannot bind
pub async fn serve(port: u16, hub: Arc<Hub>, cancel_token: CancellationToken) -> Result<()> {
    hub.setup_all()?;

    let (tx, rx) = mpsc::unbounded_channel();
    let _watcher = match watch_config_file(hub.store().path(), tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Config file changes will not be picked up: {e}");
            None
        }
    };
    tokio::spawn(reload_on_change(hub.clone(), rx, cancel_token.clone()));

    let app = router(hub);
    tracing::debug!("Routes configured");

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(ArpansaError::ServerRun)?;
    tracing::info!("Site launched on: http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await
        .map_err(ArpansaError::ServerRun)?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Reload the store and resync entries whenever the config file changes.
async fn reload_on_change(
    hub: Arc<Hub>,
    mut changes: mpsc::UnboundedReceiver<()>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            change = changes.recv() => {
                if change.is_none() {
                    break;
                }
                match hub.store().reload() {
                    Ok(true) => {
                        info!("Configuration file changed, resyncing entries");
                        if let Err(e) = hub.sync_with_store() {
                            error!("Failed to apply configuration change: {e}");
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Ignoring unreadable configuration change: {e}"),
                }
            }
        }
    }
}

/// All sensor states across entries
pub async fn list_sensors(State(hub): State<Arc<Hub>>) -> Response {
    match hub.sensor_states() {
        Ok(states) => {
            let states: Vec<SensorState> = states.into_values().flatten().collect();
            Json(states).into_response()
        }
        Err(e) => {
            error!("Failed to collect sensor states: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Stream sensor states after every poll tick
pub async fn sensor_stream(
    State(hub): State<Arc<Hub>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(hub.subscribe()).filter_map(|update| match update {
        Ok(update) => match Event::default().event("sensors").json_data(&update) {
            Ok(event) => Some(Ok::<_, Infallible>(event)),
            Err(e) => {
                error!("Failed to serialize sensor states for SSE: {e}");
                None
            }
        },
        Err(e) => {
            warn!("Sensor stream subscriber fell behind: {e}");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Stored configuration entries
pub async fn list_entries(State(hub): State<Arc<Hub>>) -> Response {
    match hub.store().entries() {
        Ok(entries) => Json::<Vec<ConfigEntry>>(entries).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Remove an entry and stop polling for it
pub async fn remove_entry(State(hub): State<Arc<Hub>>, Path(name): Path<String>) -> Response {
    match hub.store().remove(&name) {
        Ok(_) => {
            if let Err(e) = hub.unload_entry(&name) {
                error!("Failed to unload entry {name}: {e}");
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Err(ArpansaError::UnknownEntry(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to remove entry {name}: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Refresh an entry's feed now
pub async fn refresh_entry(State(hub): State<Arc<Hub>>, Path(name): Path<String>) -> Response {
    match hub.request_refresh(&name) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(ArpansaError::UnknownEntry(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to request refresh of {name}: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Show the form for a setup step
pub async fn show_flow(State(hub): State<Arc<Hub>>, Path(step): Path<String>) -> Response {
    run_config_flow(&hub, &step, None).await
}

/// Submit a setup step
pub async fn submit_flow(
    State(hub): State<Arc<Hub>>,
    Path(step): Path<String>,
    Json(input): Json<UserInput>,
) -> Response {
    run_config_flow(&hub, &step, Some(input)).await
}

/// Show the options form of an entry
pub async fn show_options(
    State(hub): State<Arc<Hub>>,
    Path((name, step)): Path<(String, String)>,
) -> Response {
    run_options_flow(&hub, &name, &step, None).await
}

/// Submit the options of an entry
pub async fn submit_options(
    State(hub): State<Arc<Hub>>,
    Path((name, step)): Path<(String, String)>,
    Json(input): Json<UserInput>,
) -> Response {
    run_options_flow(&hub, &name, &step, Some(input)).await
}

async fn run_config_flow(hub: &Hub, step: &str, input: Option<UserInput>) -> Response {
    let flow = ConfigFlow::new(hub.fetcher(), hub.store().clone()).with_feed_url(hub.feed_url());
    match flow.handle_step(step, input).await {
        Ok(result) => {
            if let FlowResult::CreateEntry { data, .. } = &result {
                if let Err(e) = hub.setup_entry(data.clone()) {
                    error!("Failed to set up entry {}: {e}", data.name);
                }
            }
            Json(result).into_response()
        }
        Err(e) => flow_error(step, &e),
    }
}

async fn run_options_flow(
    hub: &Hub,
    name: &str,
    step: &str,
    input: Option<UserInput>,
) -> Response {
    let flow =
        OptionsFlow::new(hub.fetcher(), hub.store().clone(), name).with_feed_url(hub.feed_url());
    match flow.handle_step(step, input).await {
        Ok(result) => {
            if let FlowResult::CreateEntry { .. } = &result {
                if let Err(e) = hub.reload_entry(name) {
                    error!("Failed to reload entry {name}: {e}");
                }
            }
            Json(result).into_response()
        }
        Err(e) => flow_error(step, &e),
    }
}

/// Map a wizard failure to a form carrying the `unknown` error
fn flow_error(step: &str, err: &ArpansaError) -> Response {
    let status = match err {
        ArpansaError::UnknownStep(_) => {
            error!("Wizard invoked with unknown step {step}");
            StatusCode::BAD_REQUEST
        }
        ArpansaError::UnknownEntry(_) => StatusCode::NOT_FOUND,
        _ => {
            error!("Unexpected exception in wizard step {step}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let body = FlowResult::Form {
        step_id: step.to_string(),
        data_schema: FormSchema::default(),
        errors: BTreeMap::from([(ERROR_BASE.to_string(), ERROR_UNKNOWN.to_string())]),
    };
    (status, Json(body)).into_response()
}
