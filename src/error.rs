use thiserror::Error;

/// Failure reported by a datastore adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

/// Failures that abort a whole ingestion call.
///
/// Per-row problems are never reported here; they travel back as
/// [`crate::models::RowError`] values alongside the accepted count.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No rows found in file.")]
    EmptyUpload,
    #[error("File too large: {size} bytes exceeds the {limit} byte limit.")]
    TooLarge { size: usize, limit: usize },
    #[error("replace_range uploads require both a start date and an end date.")]
    MissingRange,
    #[error("replace_range start date {start} is after end date {end}.")]
    InvertedRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
    #[error("Failed to parse PDF. Ensure it matches the Discipline Event Summary format. ({0})")]
    Pdf(String),
    #[error("Failed to parse CSV. Check the file format and encoding.")]
    InvalidText(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single source row was rejected.
///
/// The display text is what callers show next to the row number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RowProblem {
    #[error("Unable to resolve student_id for row.")]
    UnresolvedStudent,
    #[error("Multiple students match. Provide section to disambiguate.")]
    AmbiguousStudent,
    #[error("student_id is required.")]
    MissingStudent,
    #[error("event_type must be merit or demerit.")]
    InvalidEventType,
    #[error("event_date is required and must be valid.")]
    InvalidEventDate,
    #[error("points is required and must be a number.")]
    InvalidPoints,
}
