mod common;

use arpansa_uv::config::{Config, ConfigEntry, ConfigStore};
use arpansa_uv::hub::Hub;
use arpansa_uv::sensor::SensorState;
use arpansa_uv::server::{
    list_entries, list_sensors, refresh_entry, remove_entry, run, sensor_stream, serve, show_flow,
    show_options, submit_flow, submit_options,
};
use arpansa_uv::wizard::UserInput;
use axum::{
    body::Body,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::{next_update, MockFetcher, FEED_BRISBANE_SYDNEY};
use http_body_util::BodyExt; // For .collect()
use std::{
    fs,
    io::{self, Write},
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tempfile::{tempdir, NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// Helper function to find an available port
async fn find_available_port() -> Option<u16> {
    use tokio::net::TcpListener;
    for port in 8000..9000 {
        match TcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)).await {
            Ok(listener) => {
                return Some(
                    listener
                        .local_addr()
                        .expect("Failed to get local address of listener")
                        .port(),
                )
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                eprintln!(
                    "Skipping server integration test because binding to {port} failed: {err}"
                );
                return None;
            }
            Err(_) => {}
        }
    }
    panic!("No available port found");
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

fn hub_with(dir: &TempDir, fetcher: Arc<MockFetcher>) -> (Arc<Hub>, CancellationToken) {
    let store = Arc::new(ConfigStore::open(dir.path().join("arpansa_uv.json5")).unwrap());
    let cancel = CancellationToken::new();
    let hub = Arc::new(Hub::new(fetcher, store, cancel.clone()));
    (hub, cancel)
}

#[tokio::test]
async fn test_server_starts_and_serves_index() {
    // Create a temporary config file with no entries so nothing is polled
    let mut config_file = NamedTempFile::new().expect("Failed to create temp config file");
    let config_content =
        serde_json::to_string_pretty(&Config::default()).expect("Failed to serialize test config");
    config_file
        .write_all(config_content.as_bytes())
        .expect("Failed to write to temp config file");
    let config_path = config_file.path().to_path_buf();

    let Some(port) = find_available_port().await else {
        return;
    };
    let server_address = format!("http://127.0.0.1:{port}");
    let cancel_token = CancellationToken::new();

    // Spawn the server in a background task
    let server_handle = tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            run(port, Some(config_path), None, cancel_token)
                .await
                .expect("Server failed to start");
        }
    });

    // Give the server a moment to start up
    sleep(Duration::from_secs(1)).await;

    let client = reqwest::Client::new();
    let response = client
        .get(&server_address)
        .send()
        .await
        .expect("Failed to send request to server");
    assert_eq!(response.status(), StatusCode::OK.as_u16());
    let html = response.text().await.expect("Failed to read index");
    assert!(html.contains("No locations configured yet"));

    let sensors: Vec<SensorState> = client
        .get(format!("{server_address}/api/sensors"))
        .send()
        .await
        .expect("Failed to request sensors")
        .json()
        .await
        .expect("Sensors are not JSON");
    assert!(sensors.is_empty());

    // Trigger graceful shutdown
    cancel_token.cancel();

    // Wait for the server to shut down
    server_handle.await.expect("Server task failed");
}

#[tokio::test]
async fn test_unknown_step_is_reported_as_unknown() {
    let dir = tempdir().unwrap();
    let (hub, cancel) = hub_with(&dir, MockFetcher::serving(FEED_BRISBANE_SYDNEY));

    let response = show_flow(State(hub), Path("reconfigure".to_string())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["type"], "form");
    assert_eq!(body["errors"]["base"], "unknown");

    cancel.cancel();
}

#[tokio::test]
async fn test_cannot_connect_shows_form_error() {
    let dir = tempdir().unwrap();
    let (hub, cancel) = hub_with(&dir, MockFetcher::failing());

    let response = submit_flow(
        State(hub.clone()),
        Path("user".to_string()),
        Json(UserInput::default()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["errors"]["base"], "cannot_connect");
    assert!(hub.entry_names().unwrap().is_empty());
    assert!(hub.store().entries().unwrap().is_empty());

    cancel.cancel();
}

#[tokio::test]
async fn test_submit_flow_sets_up_entry() {
    let dir = tempdir().unwrap();
    let (hub, cancel) = hub_with(&dir, MockFetcher::serving(FEED_BRISBANE_SYDNEY));
    let mut updates = hub.subscribe();

    let response = submit_flow(
        State(hub.clone()),
        Path("user".to_string()),
        Json(UserInput {
            name: Some("Home".to_string()),
            locations: None,
            poll_interval: Some(2),
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["type"], "create_entry");
    assert_eq!(body["title"], "Home");
    assert_eq!(body["data"]["poll_interval"], 2);
    assert!(body["data"].get("locations").is_none());

    next_update(&mut updates, "Home").await;
    let sensors = body_json(list_sensors(State(hub.clone())).await).await;
    assert_eq!(sensors.as_array().unwrap().len(), 2);

    let entries = body_json(list_entries(State(hub.clone())).await).await;
    assert_eq!(entries[0]["name"], "Home");

    cancel.cancel();
}

#[tokio::test]
async fn test_remove_entry() {
    let dir = tempdir().unwrap();
    let (hub, cancel) = hub_with(&dir, MockFetcher::serving(FEED_BRISBANE_SYDNEY));
    hub.store().create(ConfigEntry::new("Home", None, 1)).unwrap();
    hub.setup_all().unwrap();

    let response = remove_entry(State(hub.clone()), Path("Home".to_string())).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(hub.entry_names().unwrap().is_empty());
    assert!(hub.store().get("Home").unwrap().is_none());

    let response = remove_entry(State(hub.clone()), Path("Home".to_string())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    cancel.cancel();
}

#[tokio::test]
async fn test_run_rejects_bad_feed_url() {
    let dir = tempdir().unwrap();
    let result = run(
        0,
        Some(dir.path().join("arpansa_uv.json5")),
        Some("ftp://mirror.local/uv.xml".to_string()),
        CancellationToken::new(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_options_submit_reloads_entry() {
    let dir = tempdir().unwrap();
    let (hub, cancel) = hub_with(&dir, MockFetcher::serving(FEED_BRISBANE_SYDNEY));
    hub.store()
        .create(ConfigEntry::new("Home", Some(vec!["Brisbane".to_string()]), 1))
        .unwrap();
    hub.setup_all().unwrap();

    let response = show_options(
        State(hub.clone()),
        Path(("Home".to_string(), "init".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["type"], "form");
    assert_eq!(body["step_id"], "init");

    let response = submit_options(
        State(hub.clone()),
        Path(("Home".to_string(), "init".to_string())),
        Json(UserInput {
            name: None,
            locations: Some(vec!["Sydney".to_string()]),
            poll_interval: Some(10),
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["type"], "create_entry");
    assert_eq!(body["title"], "Home");

    // the reloaded entry tracks the new selection right away
    let states = hub.sensor_states().unwrap();
    assert_eq!(states["Home"].len(), 1);
    assert_eq!(states["Home"][0].location, "Sydney");
    assert_eq!(hub.store().get("Home").unwrap().unwrap().poll_interval, 10);

    cancel.cancel();
}

#[tokio::test]
async fn test_options_for_missing_entry_is_not_found() {
    let dir = tempdir().unwrap();
    let (hub, cancel) = hub_with(&dir, MockFetcher::serving(FEED_BRISBANE_SYDNEY));

    let response = show_options(
        State(hub.clone()),
        Path(("Nowhere".to_string(), "init".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["errors"]["base"], "unknown");

    let response = submit_options(
        State(hub),
        Path(("Nowhere".to_string(), "reauth".to_string())),
        Json(UserInput::default()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    cancel.cancel();
}

#[tokio::test]
async fn test_sensor_stream_emits_updates() {
    let dir = tempdir().unwrap();
    let (hub, cancel) = hub_with(&dir, MockFetcher::serving(FEED_BRISBANE_SYDNEY));

    let mut body = sensor_stream(State(hub.clone())).await.into_response().into_body();
    hub.setup_entry(ConfigEntry::new("Home", None, 1)).unwrap();

    let text = timeout(Duration::from_secs(5), async {
        let mut text = String::new();
        while !text.contains("\n\n") {
            let frame = body
                .frame()
                .await
                .expect("stream ended")
                .expect("stream failed");
            if let Ok(data) = frame.into_data() {
                text.push_str(&String::from_utf8_lossy(&data));
            }
        }
        text
    })
    .await
    .expect("timed out waiting for sensor event");

    assert!(text.contains("event: sensors"));
    assert!(text.contains("\"entry\":\"Home\""));
    assert!(text.contains("arpansa_uv_brisbane"));

    cancel.cancel();
}

#[tokio::test]
async fn test_serve_picks_up_config_file_edits() {
    let dir = tempdir().unwrap();
    let (hub, cancel) = hub_with(&dir, MockFetcher::serving(FEED_BRISBANE_SYDNEY));

    let Some(port) = find_available_port().await else {
        return;
    };
    let server_handle = tokio::spawn(serve(port, hub.clone(), cancel.clone()));
    sleep(Duration::from_secs(1)).await;

    fs::write(
        hub.store().path(),
        "{entries: [{name: 'Home', locations: ['Brisbane'], poll_interval: 5}]}",
    )
    .expect("Failed to edit config file");

    timeout(Duration::from_secs(5), async {
        while hub.entry_names().unwrap().is_empty() {
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("config edit was not applied");

    assert_eq!(hub.entry_names().unwrap(), vec!["Home"]);
    assert_eq!(hub.store().get("Home").unwrap().unwrap().poll_interval, 5);

    cancel.cancel();
    server_handle
        .await
        .expect("Server task failed")
        .expect("Server failed");
}

#[tokio::test]
async fn test_refresh_entry() {
    let dir = tempdir().unwrap();
    let fetcher = MockFetcher::serving(FEED_BRISBANE_SYDNEY);
    let (hub, cancel) = hub_with(&dir, fetcher.clone());
    let mut updates = hub.subscribe();
    hub.setup_entry(ConfigEntry::new("Home", None, 1)).unwrap();
    next_update(&mut updates, "Home").await;

    let response = refresh_entry(State(hub.clone()), Path("Home".to_string())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    next_update(&mut updates, "Home").await;
    assert_eq!(fetcher.calls(), 2);

    let response = refresh_entry(State(hub), Path("Nowhere".to_string())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    cancel.cancel();
}
