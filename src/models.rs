use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One parsed source row keyed by normalized header name.
///
/// Values are trimmed strings; absent columns read back as `""`. Column
/// order follows the source header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawRow {
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing an earlier column with the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map_or("", |(_, v)| v.as_str())
    }

    /// First non-empty value among `keys`, or `""`.
    pub fn first_of(&self, keys: &[&str]) -> &str {
        keys.iter()
            .map(|key| self.get(key))
            .find(|value| !value.is_empty())
            .unwrap_or("")
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<&str, &str> {
        self.fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (key, value) in iter {
            row.insert(key, value);
        }
        row
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Merit,
    Demerit,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Merit => "merit",
            EventType::Demerit => "demerit",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Major => "major",
        }
    }
}

/// A validated behaviour event ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedEvent {
    pub student_id: String,
    pub student_name: Option<String>,
    pub grade: Option<i32>,
    pub section: Option<String>,
    pub event_type: EventType,
    pub event_date: NaiveDate,
    pub event_time: Option<NaiveTime>,
    pub points: i32,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub severity: Option<Severity>,
    pub staff_id: Option<String>,
    pub staff_name: Option<String>,
    pub class_context: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub source_system: Option<String>,
}

/// How existing events are treated before a batch is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    #[default]
    Append,
    ReplaceAll,
    ReplaceRange,
}

impl UploadType {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadType::Append => "append",
            UploadType::ReplaceAll => "replace_all",
            UploadType::ReplaceRange => "replace_range",
        }
    }
}

impl FromStr for UploadType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(UploadType::Append),
            "replace_all" => Ok(UploadType::ReplaceAll),
            "replace_range" => Ok(UploadType::ReplaceRange),
            other => Err(format!(
                "unknown upload type '{other}' (expected append, replace_all or replace_range)"
            )),
        }
    }
}

/// Inclusive date window deleted by a `replace_range` upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// A rejected source row. `row_number` counts the header as row 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row_number: usize,
    pub message: String,
}

/// One ingestion call as received from the upload surface.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: Option<String>,
    pub payload: Vec<u8>,
    pub source_system: Option<String>,
    pub upload_type: UploadType,
    pub range_start: Option<NaiveDate>,
    pub range_end: Option<NaiveDate>,
    pub uploaded_by: Option<String>,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            payload,
            source_system: None,
            upload_type: UploadType::Append,
            range_start: None,
            range_end: None,
            uploaded_by: None,
        }
    }
}

/// Audit record written once per ingestion call.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub uploaded_by: Option<String>,
    pub source_system: String,
    pub file_name: String,
    pub row_count: usize,
    pub upload_type: UploadType,
    pub range: Option<DateRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub upload_id: Uuid,
    pub source_system: String,
    pub file_name: String,
    pub upload_type: UploadType,
    pub rows_parsed: usize,
    pub accepted: usize,
    pub deleted: u64,
    pub students_notified: usize,
    pub errors: Vec<RowError>,
}
