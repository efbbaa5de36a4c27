use crate::error::Result;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Key under which a record repeats its own location id.
pub const FRIENDLY_NAME: &str = "friendly_name";

/// Timestamp layout used by the feed's `utcdatetime` element, e.g. `2023/01/13 19:21`.
const UTC_DATETIME_FORMAT: &str = "%Y/%m/%d %H:%M";

/// Flattened view of one `<location>` element.
///
/// The field map is schema-less: each direct child element with non-empty text
/// becomes one entry, keyed by its tag name. Typed accessors sit on top of the
/// raw strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationRecord {
    id: String,
    fields: BTreeMap<String, String>,
}

impl LocationRecord {
    fn from_node(id: &str, node: roxmltree::Node<'_, '_>) -> Self {
        let mut fields = BTreeMap::new();
        for child in node.children().filter(|n| n.is_element()) {
            let tag = child.tag_name().name();
            if tag.is_empty() {
                continue;
            }
            let text: String = child
                .descendants()
                .filter(|n| n.is_text())
                .filter_map(|n| n.text())
                .collect();
            let text = text.trim();
            if !text.is_empty() {
                fields.insert(tag.to_string(), text.to_string());
            }
        }
        fields.insert(FRIENDLY_NAME.to_string(), id.to_string());

        Self {
            id: id.to_string(),
            fields,
        }
    }

    /// Location id as published in the `id` attribute.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The full flattened field map, `friendly_name` included.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Raw text of a single field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Display name of the location; the feed repeats the id here.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        self.get(FRIENDLY_NAME).unwrap_or(&self.id)
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.get("status")
    }

    /// Whether the station reports a valid reading.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status() == Some("ok")
    }

    /// UV index as a number, if present and numeric.
    #[must_use]
    pub fn index(&self) -> Option<f64> {
        self.get("index").and_then(|v| v.parse().ok())
    }

    /// Raw `utcdatetime` text.
    #[must_use]
    pub fn utc_datetime_raw(&self) -> Option<&str> {
        self.get("utcdatetime")
    }

    /// Reading time parsed as UTC.
    #[must_use]
    pub fn utc_datetime(&self) -> Option<DateTime<Utc>> {
        self.utc_datetime_raw()
            .and_then(|v| NaiveDateTime::parse_from_str(v, UTC_DATETIME_FORMAT).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

/// One parsed snapshot of the UV feed.
///
/// Documents are immutable once built; a newer fetch produces a new document.
#[derive(Debug, Clone, Serialize)]
pub struct FeedDocument {
    locations: Vec<LocationRecord>,
    fetched_at: DateTime<Utc>,
}

impl FeedDocument {
    /// Parse the feed XML into a document.
    ///
    /// Every `location` element below the root contributes one record.
    /// Elements without an `id` attribute are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ArpansaError::Parse`] if the text is not well-formed XML.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;

        let mut locations = Vec::new();
        for node in doc.descendants().filter(|n| n.has_tag_name("location")) {
            match node.attribute("id") {
                Some(id) => locations.push(LocationRecord::from_node(id, node)),
                None => warn!("Skipping location element without an id attribute"),
            }
        }

        debug!("Parsed UV feed with {} locations", locations.len());
        Ok(Self {
            locations,
            fetched_at: Utc::now(),
        })
    }

    /// Location ids in document order.
    #[must_use]
    pub fn location_ids(&self) -> Vec<String> {
        self.locations.iter().map(|l| l.id.clone()).collect()
    }

    /// Every record in document order.
    #[must_use]
    pub fn records(&self) -> &[LocationRecord] {
        &self.locations
    }

    /// Exact-match lookup by location id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&LocationRecord> {
        self.locations.iter().find(|l| l.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Number of locations in the document.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// When this document was parsed.
    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}
