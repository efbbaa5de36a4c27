use crate::error::{ArpansaError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Integration domain, used as the prefix for entity ids
pub const DOMAIN: &str = "arpansa_uv";

/// Public ARPANSA UV observation feed
pub const ARPANSA_URL: &str = "https://uvdata.arpansa.gov.au/xml/uvvalues.xml";

pub const ATTRIBUTION: &str = "UV observations courtesy of ARPANSA";

pub const DEFAULT_NAME: &str = "ARPANSA UV";

/// Default poll interval in minutes
pub const DEFAULT_POLL_INTERVAL: u32 = 1;

/// Default location of the persisted entries
pub const CONFIG_FILE: &str = "arpansa_uv.json5";

/// Keys of the entry fields in the wizard forms
pub const CONF_NAME: &str = "name";
pub const CONF_LOCATIONS: &str = "locations";
pub const CONF_POLL_INTERVAL: &str = "poll_interval";

fn default_poll_interval() -> u32 {
    DEFAULT_POLL_INTERVAL
}

/// One configured instance of the integration
///
/// `locations` is omitted when every location in the feed should be tracked.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigEntry {
    /// Display name, also the key the entry is stored under
    pub name: String,
    /// Selected location ids; `None` tracks every location in the feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    /// Minutes between feed refreshes
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u32,
}

impl ConfigEntry {
    /// Build an entry, folding an empty selection into "all locations".
    pub fn new(
        name: impl Into<String>,
        locations: Option<Vec<String>>,
        poll_interval: u32,
    ) -> Self {
        Self {
            name: name.into(),
            locations: locations.filter(|l| !l.is_empty()),
            poll_interval,
        }
    }

    /// Whether the entry tracks every location in the feed.
    #[must_use]
    pub fn selects_all(&self) -> bool {
        self.locations.as_ref().map_or(true, Vec::is_empty)
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_interval.max(1)) * 60)
    }

    /// Validates the entry
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the poll interval is below one minute
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ArpansaError::from("Entry name cannot be empty"));
        }
        if self.poll_interval < 1 {
            return Err(ArpansaError::from("Poll interval must be at least 1 minute"));
        }
        Ok(())
    }
}

/// Contents of the configuration file
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub entries: Vec<ConfigEntry>,
}

impl Config {
    /// Load the configuration from a JSON5 file.
    ///
    /// A missing file yields an empty configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!("Loading configuration from {}", path.display());
        if !path.exists() {
            tracing::info!(
                "No configuration at {}, starting with no entries",
                path.display()
            );
            return Ok(Self::default());
        }

        let config_str = fs::read_to_string(path)?;
        let config: Config = json5::from_str(&config_str)?;
        for entry in &config.entries {
            entry.validate()?;
        }

        tracing::info!(
            "Configuration loaded successfully with {} entries",
            config.entries.len()
        );
        Ok(config)
    }

    /// Write the configuration to a JSON5 file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_json = json5::to_string(self)
            .map_err(|e| ArpansaError::from(format!("Failed to serialize config: {e}")))?;
        fs::write(path, config_json)?;
        tracing::debug!("Configuration written to {}", path.display());
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// File-backed store of configuration entries
///
/// Every mutation is written through to disk before the in-memory copy is
/// replaced.
pub struct ConfigStore {
    path: PathBuf,
    config: RwLock<Config>,
}

impl ConfigStore {
    /// Open the store, creating an empty file if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or created
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = Config::load(&path)?;
        if !path.exists() {
            config.save(&path)?;
        }
        Ok(Self {
            path,
            config: RwLock::new(config),
        })
    }

    /// Location of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every stored entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned
    pub fn entries(&self) -> Result<Vec<ConfigEntry>> {
        Ok(self.read()?.entries.clone())
    }

    /// # Errors
    ///
    /// Returns an error if the lock is poisoned
    pub fn get(&self, name: &str) -> Result<Option<ConfigEntry>> {
        Ok(self.read()?.get(name).cloned())
    }

    /// Add a new entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is invalid, its name is taken, or the
    /// file cannot be written
    pub fn create(&self, entry: ConfigEntry) -> Result<()> {
        entry.validate()?;
        self.mutate(|config| {
            if config.get(&entry.name).is_some() {
                return Err(ArpansaError::from(format!(
                    "Entry already exists: {}",
                    entry.name
                )));
            }
            config.entries.push(entry);
            Ok(())
        })
    }

    /// Replace an existing entry, matched by name.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::UnknownEntry`] if no entry has this name
    pub fn update(&self, entry: ConfigEntry) -> Result<()> {
        entry.validate()?;
        self.mutate(|config| {
            let slot = config
                .entries
                .iter_mut()
                .find(|e| e.name == entry.name)
                .ok_or_else(|| ArpansaError::UnknownEntry(entry.name.clone()))?;
            *slot = entry;
            Ok(())
        })
    }

    /// Remove an entry and return it.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::UnknownEntry`] if no entry has this name
    pub fn remove(&self, name: &str) -> Result<ConfigEntry> {
        let mut removed = None;
        self.mutate(|config| {
            let pos = config
                .entries
                .iter()
                .position(|e| e.name == name)
                .ok_or_else(|| ArpansaError::UnknownEntry(name.to_string()))?;
            removed = Some(config.entries.remove(pos));
            Ok(())
        })?;
        removed.ok_or_else(|| ArpansaError::UnknownEntry(name.to_string()))
    }

    /// Re-read the file, returning whether its contents changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed; the in-memory
    /// copy is kept in that case
    pub fn reload(&self) -> Result<bool> {
        let fresh = Config::load(&self.path)?;
        let mut guard = self
            .config
            .write()
            .map_err(|_| ArpansaError::from("Failed to acquire config write lock"))?;
        if *guard == fresh {
            return Ok(false);
        }
        *guard = fresh;
        Ok(true)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Config>> {
        self.config
            .read()
            .map_err(|_| ArpansaError::from("Failed to acquire config read lock"))
    }

    fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        let mut guard = self
            .config
            .write()
            .map_err(|_| ArpansaError::from("Failed to acquire config write lock"))?;
        let mut next = guard.clone();
        change(&mut next)?;
        next.save(&self.path)?;
        *guard = next;
        Ok(())
    }
}

/// Watch the configuration file and signal `tx` whenever it changes on disk.
///
/// The returned watcher must be kept alive for as long as notifications are wanted.
///
/// # Errors
///
/// Returns an error if the watcher cannot be created or the path cannot be watched
pub fn watch_config_file(path: &Path, tx: UnboundedSender<()>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
            if tx.send(()).is_err() {
                tracing::debug!("Config change receiver dropped");
            }
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Config watch error: {e}"),
    })
    .map_err(|e| ArpansaError::from(format!("Failed to create config watcher: {e}")))?;

    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| ArpansaError::from(format!("Failed to watch {}: {e}", path.display())))?;

    tracing::info!("Watching {} for changes", path.display());
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_selection_means_all() {
        let entry = ConfigEntry::new("Home", Some(vec![]), 1);
        assert_eq!(entry.locations, None);
        assert!(entry.selects_all());

        let entry = ConfigEntry::new("Home", Some(vec!["Brisbane".to_string()]), 1);
        assert!(!entry.selects_all());
    }

    #[test]
    fn test_poll_duration_in_minutes() {
        let entry = ConfigEntry::new("Home", None, 5);
        assert_eq!(entry.poll_duration(), Duration::from_secs(300));
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_blank_name() {
        assert!(ConfigEntry::new("Home", None, 0).validate().is_err());
        assert!(ConfigEntry::new("  ", None, 1).validate().is_err());
        assert!(ConfigEntry::new("Home", None, 1).validate().is_ok());
    }

    #[test]
    fn test_persisted_shape_omits_locations() {
        let entry = ConfigEntry::new("Home", None, 1);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, serde_json::json!({"name": "Home", "poll_interval": 1}));
    }

    #[test]
    fn test_poll_interval_defaults_when_missing() {
        let config: Config = json5::from_str("{entries: [{name: 'Home'}]}").unwrap();
        assert_eq!(config.entries[0].poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.entries[0].locations, None);
    }

    #[test]
    fn test_store_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("arpansa.json5");

        let store = ConfigStore::open(&path).unwrap();
        assert!(path.exists());
        store
            .create(ConfigEntry::new("Home", Some(vec!["Sydney".to_string()]), 2))
            .unwrap();

        let reopened = ConfigStore::open(&path).unwrap();
        let entry = reopened.get("Home").unwrap().unwrap();
        assert_eq!(entry.locations, Some(vec!["Sydney".to_string()]));
        assert_eq!(entry.poll_interval, 2);
    }

    #[test]
    fn test_store_rejects_duplicate_names() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("c.json5")).unwrap();
        store.create(ConfigEntry::new("Home", None, 1)).unwrap();
        assert!(store.create(ConfigEntry::new("Home", None, 3)).is_err());
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_store_update_and_remove() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("c.json5")).unwrap();
        assert!(matches!(
            store.update(ConfigEntry::new("Missing", None, 1)),
            Err(ArpansaError::UnknownEntry(_))
        ));

        store.create(ConfigEntry::new("Home", None, 1)).unwrap();
        store.update(ConfigEntry::new("Home", None, 10)).unwrap();
        assert_eq!(store.get("Home").unwrap().unwrap().poll_interval, 10);

        let removed = store.remove("Home").unwrap();
        assert_eq!(removed.name, "Home");
        assert!(store.get("Home").unwrap().is_none());
    }

    #[test]
    fn test_reload_detects_external_edit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json5");
        let store = ConfigStore::open(&path).unwrap();
        assert!(!store.reload().unwrap());

        fs::write(&path, "{entries: [{name: 'Edited', poll_interval: 4}]}").unwrap();
        assert!(store.reload().unwrap());
        assert_eq!(store.get("Edited").unwrap().unwrap().poll_interval, 4);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json5");
        fs::write(&path, "{entries: [{name: 'Bad', poll_interval: 0}]}").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_watcher_signals_file_edit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json5");
        let store = ConfigStore::open(&path).unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _watcher = watch_config_file(store.path(), tx).unwrap();

        fs::write(&path, "{entries: [{name: 'Watched'}]}").unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no change notification")
            .expect("watcher channel closed");

        assert!(store.reload().unwrap());
        assert_eq!(
            store.get("Watched").unwrap().unwrap().poll_interval,
            DEFAULT_POLL_INTERVAL
        );
    }
}
