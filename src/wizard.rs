//! Configuration wizard.
//!
//! [`ConfigFlow`] drives the initial `user` step that creates an entry;
//! [`OptionsFlow`] drives the `init` step (also reachable as `options_user`)
//! that adjusts an existing entry. Both discover the current list of locations
//! from the feed before building their form.

use crate::client::{FeedClient, Fetcher};
use crate::config::{
    ConfigEntry, ConfigStore, ARPANSA_URL, CONF_LOCATIONS, CONF_NAME, CONF_POLL_INTERVAL,
    DEFAULT_NAME, DEFAULT_POLL_INTERVAL,
};
use crate::error::{ArpansaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Error key for problems not tied to a single field
pub const ERROR_BASE: &str = "base";
pub const ERROR_CANNOT_CONNECT: &str = "cannot_connect";
pub const ERROR_UNKNOWN: &str = "unknown";
pub const ERROR_NAME_REQUIRED: &str = "name_required";
pub const ERROR_INVALID_POLL_INTERVAL: &str = "invalid_poll_interval";
pub const ERROR_UNKNOWN_LOCATION: &str = "unknown_location";
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";

/// Lowest accepted poll interval, in minutes
pub const MIN_POLL_INTERVAL: i64 = 1;

/// Wizard steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Initial setup
    User,
    /// Reconfiguration of an existing entry
    Init,
}

impl Step {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Step::User => "user",
            Step::Init => "init",
        }
    }
}

impl FromStr for Step {
    type Err = ArpansaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Step::User),
            "init" | "options_user" => Ok(Step::Init),
            other => Err(ArpansaError::UnknownStep(other.to_string())),
        }
    }
}

/// Values submitted by the operator
///
/// Every field is optional so that a missing field can be told apart from an
/// invalid one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UserInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub locations: Option<Vec<String>>,
    #[serde(default)]
    pub poll_interval: Option<i64>,
}

/// Input widget of a form field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    MultiSelect { options: Vec<String> },
    Integer { min: i64 },
}

/// One field of a wizard form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub key: &'static str,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// Description of the form the host renders for a step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormSchema {
    pub fields: Vec<FormField>,
}

impl FormSchema {
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Options of a multi-select field.
    #[must_use]
    pub fn options(&self, key: &str) -> Option<&[String]> {
        match &self.field(key)?.kind {
            FieldKind::MultiSelect { options } => Some(options),
            _ => None,
        }
    }
}

/// Outcome of one wizard step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    /// Show (or re-show) the form, with any errors keyed by field or `base`
    Form {
        step_id: String,
        data_schema: FormSchema,
        errors: BTreeMap<String, String>,
    },
    /// The step finished and the entry was stored
    CreateEntry { title: String, data: ConfigEntry },
    /// The flow cannot continue
    Abort { reason: String },
}

impl FlowResult {
    fn form(step: Step, data_schema: FormSchema, errors: BTreeMap<String, String>) -> Self {
        FlowResult::Form {
            step_id: step.id().to_string(),
            data_schema,
            errors,
        }
    }

    /// Errors shown with a form, empty for other results.
    #[must_use]
    pub fn errors(&self) -> BTreeMap<String, String> {
        match self {
            FlowResult::Form { errors, .. } => errors.clone(),
            _ => BTreeMap::new(),
        }
    }
}

fn base_error(code: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(ERROR_BASE.to_string(), code.to_string())])
}

/// Fetch the feed once and return the location ids it lists.
async fn discover_locations(fetcher: Arc<dyn Fetcher>, feed_url: &str) -> Result<Vec<String>> {
    let mut client = FeedClient::with_url(fetcher, feed_url)?;
    client.fetch().await?;
    client.list_location_ids()
}

/// Build the form for a step.
fn build_schema(step: Step, locations: Vec<String>, current: Option<&ConfigEntry>) -> FormSchema {
    let selected = current
        .and_then(|c| c.locations.clone())
        .unwrap_or_default();
    let interval = current.map_or(DEFAULT_POLL_INTERVAL, |c| c.poll_interval);

    let mut fields = Vec::new();
    if step == Step::User {
        fields.push(FormField {
            key: CONF_NAME,
            required: true,
            default: Some(json!(DEFAULT_NAME)),
            kind: FieldKind::Text,
        });
    }
    fields.push(FormField {
        key: CONF_LOCATIONS,
        required: false,
        default: Some(json!(selected)),
        kind: FieldKind::MultiSelect { options: locations },
    });
    fields.push(FormField {
        key: CONF_POLL_INTERVAL,
        required: true,
        default: Some(json!(interval)),
        kind: FieldKind::Integer {
            min: MIN_POLL_INTERVAL,
        },
    });
    FormSchema { fields }
}

/// Check submitted locations and interval; returns the cleaned selection.
///
/// Only locations present in `input` are checked against the feed. Omitted
/// fields fall back to the defaults unchanged, so a stored location that has
/// since left the feed does not block an interval change.
fn validate_selection(
    input: &UserInput,
    known: &[String],
    default_locations: Option<Vec<String>>,
    default_interval: u32,
    errors: &mut BTreeMap<String, String>,
) -> (Option<Vec<String>>, u32) {
    let selection = match &input.locations {
        Some(locations) => {
            let mut unique: Vec<String> = Vec::with_capacity(locations.len());
            for l in locations {
                if !unique.contains(l) {
                    unique.push(l.clone());
                }
            }
            if let Some(unknown) = unique.iter().find(|l| !known.contains(l)) {
                warn!("Rejected unknown location {unknown}");
                errors.insert(CONF_LOCATIONS.to_string(), ERROR_UNKNOWN_LOCATION.to_string());
            }
            Some(unique).filter(|l| !l.is_empty())
        }
        None => default_locations,
    };

    let interval = match input.poll_interval {
        None => default_interval,
        Some(v) if v >= MIN_POLL_INTERVAL => u32::try_from(v).unwrap_or(u32::MAX),
        Some(_) => {
            errors.insert(
                CONF_POLL_INTERVAL.to_string(),
                ERROR_INVALID_POLL_INTERVAL.to_string(),
            );
            default_interval
        }
    };
    (selection, interval)
}

/// Flow that creates a new configuration entry
pub struct ConfigFlow {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<ConfigStore>,
    feed_url: String,
}

impl ConfigFlow {
    /// Create a setup flow against the public ARPANSA feed.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - HTTP access used for location discovery
    /// * `store` - Where the new entry is persisted
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<ConfigStore>) -> Self {
        Self {
            fetcher,
            store,
            feed_url: ARPANSA_URL.to_string(),
        }
    }

    /// Discover locations from another feed location.
    #[must_use]
    pub fn with_feed_url(mut self, feed_url: impl Into<String>) -> Self {
        self.feed_url = feed_url.into();
        self
    }

    /// Handle a step by name.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::UnknownStep`] for any step other than `user`
    pub async fn handle_step(&self, step_id: &str, input: Option<UserInput>) -> Result<FlowResult> {
        match step_id.parse::<Step>()? {
            Step::User => Ok(self.step_user(input).await),
            Step::Init => Err(ArpansaError::UnknownStep(step_id.to_string())),
        }
    }

    /// The `user` step: pick a name, locations and poll interval.
    pub async fn step_user(&self, input: Option<UserInput>) -> FlowResult {
        let locations = match discover_locations(self.fetcher.clone(), &self.feed_url).await {
            Ok(locations) => locations,
            Err(e) => {
                error!("Cannot reach the UV feed during setup: {e}");
                return FlowResult::form(
                    Step::User,
                    build_schema(Step::User, Vec::new(), None),
                    base_error(ERROR_CANNOT_CONNECT),
                );
            }
        };
        let schema = build_schema(Step::User, locations.clone(), None);

        let Some(input) = input else {
            return FlowResult::form(Step::User, schema, BTreeMap::new());
        };
        info!("Validating setup input {input:?}");

        let mut errors = BTreeMap::new();
        let name = input
            .name
            .as_deref()
            .map_or(DEFAULT_NAME, str::trim)
            .to_string();
        if name.is_empty() {
            errors.insert(CONF_NAME.to_string(), ERROR_NAME_REQUIRED.to_string());
        }
        let (selection, interval) =
            validate_selection(&input, &locations, None, DEFAULT_POLL_INTERVAL, &mut errors);
        if !errors.is_empty() {
            return FlowResult::form(Step::User, schema, errors);
        }

        match self.store.get(&name) {
            Ok(Some(_)) => {
                return FlowResult::Abort {
                    reason: ABORT_ALREADY_CONFIGURED.to_string(),
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("Unexpected exception reading entries: {e}");
                return FlowResult::form(Step::User, schema, base_error(ERROR_UNKNOWN));
            }
        }

        let entry = ConfigEntry::new(name, selection, interval);
        if let Err(e) = self.store.create(entry.clone()) {
            error!("Unexpected exception storing entry: {e}");
            return FlowResult::form(Step::User, schema, base_error(ERROR_UNKNOWN));
        }
        info!("Created entry {}", entry.name);
        FlowResult::CreateEntry {
            title: entry.name.clone(),
            data: entry,
        }
    }
}

/// Flow that adjusts an existing configuration entry
pub struct OptionsFlow {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<ConfigStore>,
    entry_name: String,
    feed_url: String,
}

impl OptionsFlow {
    /// Create an options flow for the entry stored under `entry_name`.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - HTTP access used for location discovery
    /// * `store` - Store holding the entry
    /// * `entry_name` - Name of the entry to adjust
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<ConfigStore>, entry_name: impl Into<String>) -> Self {
        Self {
            fetcher,
            store,
            entry_name: entry_name.into(),
            feed_url: ARPANSA_URL.to_string(),
        }
    }

    /// Discover locations from another feed location.
    #[must_use]
    pub fn with_feed_url(mut self, feed_url: impl Into<String>) -> Self {
        self.feed_url = feed_url.into();
        self
    }

    /// Handle a step by name.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::UnknownStep`] for steps other than `init` and
    /// `options_user`, and [`ArpansaError::UnknownEntry`] if the entry is gone
    pub async fn handle_step(&self, step_id: &str, input: Option<UserInput>) -> Result<FlowResult> {
        match step_id.parse::<Step>()? {
            Step::Init => self.step_init(input).await,
            Step::User => Err(ArpansaError::UnknownStep(step_id.to_string())),
        }
    }

    /// The `init` step: change locations and poll interval.
    ///
    /// The entry keeps its name; fields missing from `input` keep their
    /// current values.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::UnknownEntry`] if the entry no longer exists
    pub async fn step_init(&self, input: Option<UserInput>) -> Result<FlowResult> {
        let current = self
            .store
            .get(&self.entry_name)?
            .ok_or_else(|| ArpansaError::UnknownEntry(self.entry_name.clone()))?;

        let locations = match discover_locations(self.fetcher.clone(), &self.feed_url).await {
            Ok(locations) => locations,
            Err(e) => {
                error!("Cannot reach the UV feed while editing {}: {e}", current.name);
                return Ok(FlowResult::form(
                    Step::Init,
                    build_schema(Step::Init, Vec::new(), Some(&current)),
                    base_error(ERROR_CANNOT_CONNECT),
                ));
            }
        };
        let schema = build_schema(Step::Init, locations.clone(), Some(&current));

        let Some(input) = input else {
            return Ok(FlowResult::form(Step::Init, schema, BTreeMap::new()));
        };
        info!("Validating options input {input:?}");

        let mut errors = BTreeMap::new();
        let (selection, interval) = validate_selection(
            &input,
            &locations,
            current.locations.clone(),
            current.poll_interval,
            &mut errors,
        );
        if !errors.is_empty() {
            return Ok(FlowResult::form(Step::Init, schema, errors));
        }

        let updated = ConfigEntry::new(current.name.clone(), selection, interval);
        if let Err(e) = self.store.update(updated.clone()) {
            error!("Unexpected exception updating entry: {e}");
            return Ok(FlowResult::form(Step::Init, schema, base_error(ERROR_UNKNOWN)));
        }
        info!("Updated options for entry {}", updated.name);
        Ok(FlowResult::CreateEntry {
            title: current.name,
            data: updated,
        })
    }
}
