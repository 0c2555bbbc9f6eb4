use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Uploads larger than this are refused outright.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Rows per multi-row insert statement.
pub const INSERT_BATCH_SIZE: usize = 500;

pub const DEFAULT_SOURCE_SYSTEM: &str = "csv_upload";

/// Institution-specific rules for reading discipline report headers.
///
/// The defaults describe the "Discipline Event Summary" export: a header
/// mentioning "Buy Back" or carrying negative points is a merit, and the
/// stored point value drops the sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConvention {
    /// Case-insensitive phrases that mark a header as a merit.
    pub merit_markers: Vec<String>,
    pub negative_points_are_merit: bool,
    pub absolute_points: bool,
    /// `source_system` stamped on every extracted row.
    pub source_label: String,
}

impl Default for ReportConvention {
    fn default() -> Self {
        Self {
            merit_markers: vec!["Buy Back".to_string()],
            negative_points_are_merit: true,
            absolute_points: true,
            source_label: "Discipline Event Summary PDF".to_string(),
        }
    }
}

impl ReportConvention {
    pub fn is_merit(&self, header: &str, raw_points: Option<i64>) -> bool {
        let lowered = header.to_lowercase();
        let marked = self
            .merit_markers
            .iter()
            .filter(|marker| !marker.trim().is_empty())
            .any(|marker| lowered.contains(&marker.to_lowercase()));

        marked || (self.negative_points_are_merit && raw_points.is_some_and(|p| p < 0))
    }

    /// `None` when the absolute value does not fit.
    pub fn stored_points(&self, raw: i64) -> Option<i64> {
        if self.absolute_points {
            raw.checked_abs()
        } else {
            Some(raw)
        }
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read convention file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid convention file {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub max_upload_bytes: usize,
    pub batch_size: usize,
    pub default_source_system: String,
    pub convention: ReportConvention,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: MAX_UPLOAD_BYTES,
            batch_size: INSERT_BATCH_SIZE,
            default_source_system: DEFAULT_SOURCE_SYSTEM.to_string(),
            convention: ReportConvention::default(),
        }
    }
}

impl IngestConfig {
    pub fn with_convention(mut self, convention: ReportConvention) -> Self {
        self.convention = convention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_back_is_a_merit_regardless_of_sign() {
        let convention = ReportConvention::default();
        assert!(convention.is_merit("Violation Homework buy back", Some(3)));
        assert!(convention.is_merit("Violation Late", Some(-2)));
        assert!(!convention.is_merit("Violation Late", Some(2)));
        assert!(!convention.is_merit("Violation Late", None));
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let convention: ReportConvention =
            serde_json::from_str(r#"{"merit_markers": ["Commendation"], "absolute_points": false}"#)
                .unwrap();
        assert_eq!(convention.merit_markers, vec!["Commendation"]);
        assert!(convention.negative_points_are_merit);
        assert_eq!(convention.stored_points(-4), Some(-4));
        assert_eq!(convention.source_label, "Discipline Event Summary PDF");
    }

    #[test]
    fn absolute_points_refuse_the_minimum_value() {
        let convention = ReportConvention::default();
        assert_eq!(convention.stored_points(-7), Some(7));
        assert_eq!(convention.stored_points(i64::MIN), None);
    }

    #[test]
    fn default_config_limits() {
        let config = IngestConfig::default();
        assert_eq!(config.max_upload_bytes, 10_485_760);
        assert_eq!(config.batch_size, 500);
    }
}
