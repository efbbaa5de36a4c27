use crate::client::{parse_feed_url, FeedClient, Fetcher};
use crate::config::{ConfigEntry, ConfigStore, ARPANSA_URL};
use crate::coordinator::{Coordinator, CoordinatorData};
use crate::error::{ArpansaError, Result};
use crate::sensor::{SensorPlatform, SensorState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the sensor update broadcast channel
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Sensor states published after a poll tick of one entry
#[derive(Debug, Clone, Serialize)]
pub struct EntryUpdate {
    pub entry: String,
    pub states: Vec<SensorState>,
}

/// Runtime state for a loaded entry
struct LoadedEntry {
    entry: ConfigEntry,
    platform: Arc<RwLock<SensorPlatform>>,
    data: watch::Receiver<CoordinatorData>,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
}

/// Loads configuration entries and keeps one polling coordinator per entry.
pub struct Hub {
    fetcher: Arc<dyn Fetcher>,
    feed_url: String,
    store: Arc<ConfigStore>,
    loaded: RwLock<BTreeMap<String, LoadedEntry>>,
    updates: broadcast::Sender<EntryUpdate>,
    cancel: CancellationToken,
}

impl Hub {
    /// `cancel` is the parent of every entry's polling task.
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<ConfigStore>, cancel: CancellationToken) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            fetcher,
            feed_url: ARPANSA_URL.to_string(),
            store,
            loaded: RwLock::new(BTreeMap::new()),
            updates,
            cancel,
        }
    }

    /// Poll a different feed location, e.g. a mirror of the ARPANSA feed.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not an absolute http(s) URL
    pub fn with_feed_url(mut self, url: &str) -> Result<Self> {
        self.feed_url = parse_feed_url(url)?.into();
        Ok(self)
    }

    /// The feed location every entry polls
    #[must_use]
    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// HTTP access shared by every coordinator and wizard flow
    #[must_use]
    pub fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }

    /// Receive the sensor states of every entry after each poll tick.
    ///
    /// # Returns
    ///
    /// A receiver that sees updates published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntryUpdate> {
        self.updates.subscribe()
    }

    /// Set up every entry in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read
    pub fn setup_all(&self) -> Result<()> {
        for entry in self.store.entries()? {
            self.setup_entry(entry)?;
        }
        Ok(())
    }

    /// Start polling for an entry and register its sensors.
    ///
    /// An entry that is already loaded under the same name is replaced and
    /// its polling stopped.
    ///
    /// # Arguments
    ///
    /// * `entry` - The configuration entry to load
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is invalid or the registry lock is poisoned
    pub fn setup_entry(&self, entry: ConfigEntry) -> Result<()> {
        entry.validate()?;

        let client = FeedClient::with_url(self.fetcher.clone(), &self.feed_url)?;
        let cancel = self.cancel.child_token();
        let platform = Arc::new(RwLock::new(SensorPlatform::new(&entry)));
        let coordinator = Coordinator::new(entry.name.clone(), client, entry.poll_duration());
        let data = coordinator.subscribe();
        let trigger = coordinator.refresh_trigger();

        let mut loaded = self.write()?;
        tokio::spawn(coordinator.run(cancel.clone()));
        tokio::spawn(forward_updates(
            entry.name.clone(),
            data.clone(),
            platform.clone(),
            self.updates.clone(),
            cancel.clone(),
        ));

        info!(
            "Set up entry {} ({} locations, every {} min)",
            entry.name,
            entry
                .locations
                .as_ref()
                .map_or_else(|| "all".to_string(), |l| l.len().to_string()),
            entry.poll_interval
        );
        let previous = loaded.insert(
            entry.name.clone(),
            LoadedEntry {
                entry,
                platform,
                data,
                trigger,
                cancel,
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
            debug!("Replaced running entry {}", previous.entry.name);
        }
        Ok(())
    }

    /// Stop polling for an entry and drop its sensors.
    ///
    /// Returns whether the entry was loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned
    pub fn unload_entry(&self, name: &str) -> Result<bool> {
        let Some(loaded) = self.write()?.remove(name) else {
            return Ok(false);
        };
        loaded.cancel.cancel();
        info!("Unloaded entry {name}");
        Ok(true)
    }

    /// Unload an entry and set it up again from the stored configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::UnknownEntry`] if the store has no such entry
    pub fn reload_entry(&self, name: &str) -> Result<()> {
        let entry = self
            .store
            .get(name)?
            .ok_or_else(|| ArpansaError::UnknownEntry(name.to_string()))?;
        self.setup_entry(entry)
    }

    /// Bring the loaded entries in line with the store after an external edit.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or registry cannot be read
    pub fn sync_with_store(&self) -> Result<()> {
        let wanted = self.store.entries()?;
        let loaded: Vec<(String, ConfigEntry)> = self
            .read()?
            .iter()
            .map(|(name, l)| (name.clone(), l.entry.clone()))
            .collect();

        for (name, _) in &loaded {
            if !wanted.iter().any(|e| &e.name == name) {
                self.unload_entry(name)?;
            }
        }
        for entry in wanted {
            let unchanged = loaded
                .iter()
                .any(|(name, current)| name == &entry.name && current == &entry);
            if !unchanged {
                self.setup_entry(entry)?;
            }
        }
        Ok(())
    }

    /// Ask a loaded entry to refresh the feed now instead of at its next tick.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::UnknownEntry`] if the entry is not loaded
    pub fn request_refresh(&self, name: &str) -> Result<()> {
        let loaded = self.read()?;
        let entry = loaded
            .get(name)
            .ok_or_else(|| ArpansaError::UnknownEntry(name.to_string()))?;
        entry.trigger.notify_one();
        debug!("Refresh requested for entry {name}");
        Ok(())
    }

    /// Names of the loaded entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned
    pub fn entry_names(&self) -> Result<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Latest coordinator data for a loaded entry.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::UnknownEntry`] if the entry is not loaded
    pub fn entry_data(&self, name: &str) -> Result<CoordinatorData> {
        self.read()?
            .get(name)
            .map(|l| l.data.borrow().clone())
            .ok_or_else(|| ArpansaError::UnknownEntry(name.to_string()))
    }

    /// Current sensor states, grouped by entry name.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned
    pub fn sensor_states(&self) -> Result<BTreeMap<String, Vec<SensorState>>> {
        let loaded = self.read()?;
        let mut states = BTreeMap::new();
        for (name, l) in loaded.iter() {
            let platform = l
                .platform
                .read()
                .map_err(|_| ArpansaError::from("Failed to acquire sensor platform read lock"))?;
            states.insert(name.clone(), platform.states());
        }
        Ok(states)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, LoadedEntry>>> {
        self.loaded
            .read()
            .map_err(|_| ArpansaError::from("Failed to acquire entry registry read lock"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, LoadedEntry>>> {
        self.loaded
            .write()
            .map_err(|_| ArpansaError::from("Failed to acquire entry registry write lock"))
    }
}

/// Push every coordinator update through the entry's sensors and broadcast the states.
async fn forward_updates(
    name: String,
    mut data: watch::Receiver<CoordinatorData>,
    platform: Arc<RwLock<SensorPlatform>>,
    updates: broadcast::Sender<EntryUpdate>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = data.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = data.borrow_and_update().clone();
                let Some(states) = apply_update(&name, &platform, &snapshot) else {
                    continue;
                };
                if updates.send(EntryUpdate { entry: name.clone(), states }).is_err() {
                    debug!("No subscribers for sensor updates of {name}");
                }
            }
        }
    }
}

fn apply_update(
    name: &str,
    platform: &RwLock<SensorPlatform>,
    data: &CoordinatorData,
) -> Option<Vec<SensorState>> {
    let mut platform = match platform.write() {
        Ok(guard) => guard,
        Err(e) => {
            error!("Failed to acquire sensor platform write lock for {name}: {e}");
            return None;
        }
    };
    let added = platform.update(data.document.as_deref(), data.last_update_success);
    if !added.is_empty() {
        info!("Entry {name} registered sensors for {}", added.join(", "));
    }
    if !data.last_update_success {
        warn!(
            "Entry {name} sensors are unavailable: {}",
            data.last_error.as_deref().unwrap_or("no successful refresh yet")
        );
    }
    Some(platform.states())
}
