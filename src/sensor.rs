//! UV index sensor entities.
//!
//! Each configured location is exposed as one [`UvSensor`]. The sensor holds
//! no feed data of its own beyond the values computed at the last poll tick;
//! on every tick it re-resolves its location in the freshest document.

use crate::config::{ConfigEntry, ATTRIBUTION, DOMAIN};
use crate::error::{ArpansaError, Result};
use crate::feed::{FeedDocument, LocationRecord};
use crate::utils::underscore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Icon shown next to every UV sensor
pub const ICON: &str = "mdi:sunglasses";
/// Readings are point-in-time measurements
pub const STATE_CLASS: &str = "measurement";

/// Auxiliary attributes published next to the UV index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorAttributes {
    /// Time of the reading as reported by the station
    pub utc_datetime: Option<DateTime<Utc>>,
    /// Raw station status, `ok` when the reading is valid
    pub status: Option<String>,
}

/// Externally visible state of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    pub unique_id: String,
    pub name: String,
    pub location: String,
    pub available: bool,
    pub native_value: Option<f64>,
    pub icon: String,
    pub state_class: String,
    pub attribution: String,
    pub attributes: SensorAttributes,
}

/// UV index sensor for a single location
#[derive(Debug, Clone)]
pub struct UvSensor {
    location: String,
    unique_id: String,
    available: bool,
    native_value: Option<f64>,
    attributes: SensorAttributes,
}

impl UvSensor {
    /// Create an unavailable sensor for `location`.
    ///
    /// The unique id is derived from the location id and stays stable across
    /// restarts.
    pub fn new(location: impl Into<String>) -> Self {
        let location = location.into();
        let unique_id = format!("{DOMAIN}_{}", underscore(&location));
        Self {
            location,
            unique_id,
            available: false,
            native_value: None,
            attributes: SensorAttributes::default(),
        }
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Display name, e.g. `Brisbane UV Index`
    #[must_use]
    pub fn name(&self) -> String {
        format!("{} UV Index", self.location)
    }

    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    #[must_use]
    pub fn available(&self) -> bool {
        self.available
    }

    /// UV index while available
    #[must_use]
    pub fn native_value(&self) -> Option<f64> {
        self.native_value
    }

    #[must_use]
    pub fn extra_state_attributes(&self) -> &SensorAttributes {
        &self.attributes
    }

    /// Recompute state from the freshest document.
    ///
    /// # Arguments
    ///
    /// * `document` - Last successfully parsed feed, if any
    /// * `last_update_success` - Whether the most recent refresh succeeded
    ///
    /// The sensor is only available while the feed is being refreshed and
    /// the station reports `ok`. After a failed refresh the last document is
    /// still used for the attributes, but the value is withdrawn. A location
    /// that cannot be resolved leaves the sensor unavailable with empty
    /// attributes; the failure is logged and not returned.
    pub fn update(&mut self, document: Option<&FeedDocument>, last_update_success: bool) {
        match resolve(document, &self.location) {
            Ok(record) => {
                self.available = last_update_success && record.is_ok();
                self.native_value = if self.available { record.index() } else { None };
                self.attributes = SensorAttributes {
                    utc_datetime: record.utc_datetime(),
                    status: record.status().map(str::to_string),
                };
                debug!(
                    "Sensor {} updated: available={}, value={:?}",
                    self.unique_id, self.available, self.native_value
                );
            }
            Err(e) => {
                warn!("Sensor {} has no reading: {e}", self.unique_id);
                self.available = false;
                self.native_value = None;
                self.attributes = SensorAttributes::default();
            }
        }
    }

    /// Snapshot of the sensor for the API and the dashboard
    #[must_use]
    pub fn state(&self) -> SensorState {
        SensorState {
            unique_id: self.unique_id.clone(),
            name: self.name(),
            location: self.location.clone(),
            available: self.available,
            native_value: self.native_value,
            icon: ICON.to_string(),
            state_class: STATE_CLASS.to_string(),
            attribution: ATTRIBUTION.to_string(),
            attributes: self.attributes.clone(),
        }
    }
}

fn resolve<'a>(document: Option<&'a FeedDocument>, location: &str) -> Result<&'a LocationRecord> {
    document
        .ok_or(ArpansaError::NotReady)?
        .get(location)
        .ok_or_else(|| ArpansaError::UnknownLocation(location.to_string()))
}

/// The set of sensors belonging to one configuration entry
///
/// With an explicit selection the set is fixed at construction. When the
/// entry tracks every location, sensors are added as new locations appear
/// in the feed; sensors are never removed while the entry is loaded.
#[derive(Debug, Clone)]
pub struct SensorPlatform {
    selection: Option<Vec<String>>,
    sensors: Vec<UvSensor>,
}

impl SensorPlatform {
    /// Build the sensors of an entry.
    ///
    /// # Arguments
    ///
    /// * `entry` - The entry whose selection decides the sensors
    ///
    /// # Returns
    ///
    /// One sensor per selected location, or an empty platform that fills up
    /// on the first update when every location is tracked.
    #[must_use]
    pub fn new(entry: &ConfigEntry) -> Self {
        let selection = if entry.selects_all() {
            None
        } else {
            entry.locations.clone()
        };
        let sensors = selection
            .iter()
            .flatten()
            .map(UvSensor::new)
            .collect();
        Self { selection, sensors }
    }

    /// Apply one poll tick: register newly seen locations, then update every sensor.
    ///
    /// # Arguments
    ///
    /// * `document` - Last successfully parsed feed, if any
    /// * `last_update_success` - Whether the most recent refresh succeeded
    ///
    /// # Returns
    ///
    /// The ids of locations whose sensors were added by this tick.
    pub fn update(
        &mut self,
        document: Option<&FeedDocument>,
        last_update_success: bool,
    ) -> Vec<String> {
        let mut added = Vec::new();
        if let (None, Some(doc)) = (&self.selection, document) {
            for id in doc.location_ids() {
                if !self.sensors.iter().any(|s| s.location() == id) {
                    self.sensors.push(UvSensor::new(id.clone()));
                    added.push(id);
                }
            }
        }
        for sensor in &mut self.sensors {
            sensor.update(document, last_update_success);
        }
        added
    }

    /// Sensors in registration order
    #[must_use]
    pub fn sensors(&self) -> &[UvSensor] {
        &self.sensors
    }

    /// Current state of every sensor, in registration order
    #[must_use]
    pub fn states(&self) -> Vec<SensorState> {
        self.sensors.iter().map(UvSensor::state).collect()
    }
}
