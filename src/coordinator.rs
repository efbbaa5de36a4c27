use crate::client::{FeedClient, Fetcher};
use crate::error::{ArpansaError, Result};
use crate::feed::FeedDocument;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Upper bound on a single feed refresh
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// What the coordinator hands to its dependents after every refresh
#[derive(Debug, Clone, Default)]
pub struct CoordinatorData {
    /// Last successfully parsed document; kept across failed refreshes
    pub document: Option<Arc<FeedDocument>>,
    /// Whether the most recent refresh succeeded
    pub last_update_success: bool,
    /// Time of the most recent successful refresh
    pub last_updated: Option<DateTime<Utc>>,
    /// Description of the most recent failure, cleared on success
    pub last_error: Option<String>,
}

/// Periodically refreshes one [`FeedClient`] and publishes the result.
///
/// Refreshes run strictly one at a time. Dependents subscribe to a watch
/// channel and always observe the latest [`CoordinatorData`].
pub struct Coordinator<F> {
    name: String,
    client: FeedClient<F>,
    interval: Duration,
    timeout: Duration,
    tx: watch::Sender<CoordinatorData>,
    trigger: Arc<Notify>,
}

impl<F: Fetcher> Coordinator<F> {
    /// Create a coordinator that has not fetched yet.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in log lines, usually the entry name
    /// * `client` - The feed client to refresh
    /// * `interval` - Time between scheduled refreshes
    pub fn new(name: impl Into<String>, client: FeedClient<F>, interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(CoordinatorData::default());
        Self {
            name: name.into(),
            client,
            interval,
            timeout: DEFAULT_FETCH_TIMEOUT,
            tx,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Replace the default bound on a single refresh.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Receive the data published after every refresh.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorData> {
        self.tx.subscribe()
    }

    /// Handle that requests an out-of-schedule refresh from a running coordinator.
    ///
    /// A request made while a refresh is in flight is served right after it;
    /// requests do not queue up beyond one.
    #[must_use]
    pub fn refresh_trigger(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    /// The most recently published data.
    #[must_use]
    pub fn data(&self) -> CoordinatorData {
        self.tx.borrow().clone()
    }

    /// Run one refresh now and publish the outcome.
    ///
    /// # Errors
    ///
    /// Returns the fetch or parse failure, or a timeout as
    /// [`ArpansaError::Fetch`]. Subscribers are notified either way.
    pub async fn refresh(&mut self) -> Result<Arc<FeedDocument>> {
        debug!("[{}] Refreshing UV feed", self.name);
        let outcome = match tokio::time::timeout(self.timeout, self.client.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(ArpansaError::Fetch(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        };

        match &outcome {
            Ok(document) => {
                let document = document.clone();
                self.tx.send_replace(CoordinatorData {
                    document: Some(document),
                    last_update_success: true,
                    last_updated: Some(Utc::now()),
                    last_error: None,
                });
            }
            Err(e) => {
                error!("[{}] Error fetching UV feed: {e}", self.name);
                let message = e.to_string();
                self.tx.send_modify(|data| {
                    data.last_update_success = false;
                    data.last_error = Some(message);
                });
            }
        }
        outcome
    }

    /// Refresh on every interval tick until `cancel` fires.
    ///
    /// The first refresh happens immediately. A refresh requested through
    /// [`Coordinator::refresh_trigger`] restarts the interval.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "[{}] Starting UV feed polling every {}s",
            self.name,
            self.interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let trigger = self.trigger.clone();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    // Failures are already published and logged.
                    let _ = self.refresh().await;
                }
                () = trigger.notified() => {
                    debug!("[{}] Refresh requested", self.name);
                    let _ = self.refresh().await;
                    interval.reset();
                }
            }
        }
        info!("[{}] UV feed polling stopped", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FEED: &str = r#"<stations><location id="Brisbane"><index>5.2</index><status>ok</status></location></stations>"#;

    /// Succeeds on the first call, fails afterwards.
    struct FlakyFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn get(&self, _url: &str) -> Result<Vec<u8>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(FEED.as_bytes().to_vec())
            } else {
                Err(ArpansaError::Fetch("status 502".to_string()))
            }
        }
    }

    struct SlowFetcher;

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn get(&self, _url: &str) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(FEED.as_bytes().to_vec())
        }
    }

    fn flaky() -> FeedClient<FlakyFetcher> {
        FeedClient::new(FlakyFetcher {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_document() {
        let mut coordinator = Coordinator::new("test", flaky(), Duration::from_secs(60));
        let rx = coordinator.subscribe();

        coordinator.refresh().await.unwrap();
        assert!(rx.borrow().last_update_success);
        let first_update = rx.borrow().last_updated;
        assert!(first_update.is_some());

        assert!(coordinator.refresh().await.is_err());
        let data = rx.borrow().clone();
        assert!(!data.last_update_success);
        assert!(data.last_error.is_some());
        assert_eq!(data.last_updated, first_update);
        assert_eq!(data.document.unwrap().location_ids(), vec!["Brisbane"]);
    }

    #[tokio::test]
    async fn test_refresh_times_out() {
        let mut coordinator = Coordinator::new(
            "slow",
            FeedClient::new(SlowFetcher),
            Duration::from_secs(60),
        )
        .with_timeout(Duration::from_millis(20));

        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, ArpansaError::Fetch(_)));
        assert!(coordinator.data().document.is_none());
    }

    #[tokio::test]
    async fn test_run_refreshes_immediately_and_stops_on_cancel() {
        let coordinator = Coordinator::new("run", flaky(), Duration::from_secs(3600));
        let mut rx = coordinator.subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(coordinator.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("no update published")
            .unwrap();
        assert!(rx.borrow().last_update_success);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("coordinator did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_trigger_refreshes_between_ticks() {
        let coordinator = Coordinator::new("trigger", flaky(), Duration::from_secs(3600));
        let mut rx = coordinator.subscribe();
        let trigger = coordinator.refresh_trigger();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(coordinator.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("no initial update")
            .unwrap();
        assert!(rx.borrow_and_update().last_update_success);

        trigger.notify_one();
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("requested refresh did not run")
            .unwrap();
        let data = rx.borrow().clone();
        assert!(!data.last_update_success);
        assert!(data.document.is_some());

        cancel.cancel();
        handle.await.unwrap();
    }
}
