//! Shared helpers for the integration tests.
#![allow(dead_code)]

use arpansa_uv::client::Fetcher;
use arpansa_uv::error::{ArpansaError, Result};
use arpansa_uv::hub::EntryUpdate;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const FEED_BRISBANE_SYDNEY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<stations>
  <location id="Brisbane">
    <name>bri</name>
    <index>5.2</index>
    <utcdatetime>2023/01/13 19:21</utcdatetime>
    <status>ok</status>
  </location>
  <location id="Sydney">
    <name>syd</name>
    <utcdatetime>2023/01/13 19:21</utcdatetime>
    <status>measurement unavailable</status>
  </location>
</stations>"#;

pub const FEED_ABC: &str = r#"<stations>
  <location id="A"><index>1.0</index><status>ok</status></location>
  <location id="B"><index>2.0</index><status>ok</status></location>
  <location id="C"><index>3.0</index><status>ok</status></location>
</stations>"#;

/// Serves a fixed body, or fails like an unreachable host when it has none.
pub struct MockFetcher {
    body: Mutex<Option<String>>,
    calls: AtomicUsize,
    last_url: Mutex<Option<String>>,
}

impl MockFetcher {
    pub fn serving(xml: &str) -> Arc<Self> {
        Arc::new(Self {
            body: Mutex::new(Some(xml.to_string())),
            calls: AtomicUsize::new(0),
            last_url: Mutex::new(None),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            body: Mutex::new(None),
            calls: AtomicUsize::new(0),
            last_url: Mutex::new(None),
        })
    }

    pub fn set_body(&self, xml: Option<&str>) {
        *self.body.lock().unwrap() = xml.map(str::to_string);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock().unwrap() = Some(url.to_string());
        self.body
            .lock()
            .unwrap()
            .clone()
            .map(String::into_bytes)
            .ok_or_else(|| ArpansaError::Fetch("connection refused".to_string()))
    }
}

/// Wait for the next sensor update of `entry`, skipping other entries.
pub async fn next_update(rx: &mut broadcast::Receiver<EntryUpdate>, entry: &str) -> EntryUpdate {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = rx.recv().await.expect("update channel closed");
            if update.entry == entry {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for sensor update")
}
