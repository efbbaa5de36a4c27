use crate::config::{ATTRIBUTION, DEFAULT_NAME};
use crate::hub::Hub;
use crate::sensor::SensorState;
use crate::utils::format_update_time;
use askama_axum::Template;
use axum::extract::State;
use std::sync::Arc;

/// One sensor line on the dashboard
pub struct SensorRow {
    pub unique_id: String,
    pub name: String,
    pub value: String,
    pub status: String,
    pub available: bool,
}

impl From<&SensorState> for SensorRow {
    fn from(state: &SensorState) -> Self {
        let value = match state.native_value {
            Some(v) if state.available => format!("{v:.1}"),
            _ => "–".to_string(),
        };
        Self {
            unique_id: state.unique_id.clone(),
            name: state.name.clone(),
            value,
            status: state
                .attributes
                .status
                .clone()
                .unwrap_or_else(|| "no data".to_string()),
            available: state.available,
        }
    }
}

/// One configuration entry on the dashboard
pub struct EntrySection {
    pub name: String,
    pub updated: String,
    pub rows: Vec<SensorRow>,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub title: String,
    pub attribution: &'static str,
    pub entries: Vec<EntrySection>,
}

/// Renders the dashboard with the current state of every loaded sensor
pub async fn generate_index(State(hub): State<Arc<Hub>>) -> IndexTemplate {
    tracing::debug!("Generating index template");

    let states = hub.sensor_states().unwrap_or_else(|e| {
        tracing::error!("Failed to collect sensor states: {e}");
        Default::default()
    });

    let entries: Vec<EntrySection> = states
        .iter()
        .map(|(name, sensors)| {
            let updated = match hub.entry_data(name) {
                Ok(data) => match (data.last_updated, data.last_update_success) {
                    (Some(t), true) => format!("Updated {}", format_update_time(t)),
                    (Some(t), false) => {
                        format!("Feed unreachable, showing {}", format_update_time(t))
                    }
                    (None, _) => "Waiting for first update".to_string(),
                },
                Err(_) => "Not loaded".to_string(),
            };
            EntrySection {
                name: name.clone(),
                updated,
                rows: sensors.iter().map(SensorRow::from).collect(),
            }
        })
        .collect();

    tracing::info!("Index template generated with {} entries", entries.len());
    IndexTemplate {
        title: DEFAULT_NAME.to_string(),
        attribution: ATTRIBUTION,
        entries,
    }
}
