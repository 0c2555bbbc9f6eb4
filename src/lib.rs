pub mod config;
pub mod db;
pub mod delimited;
pub mod discipline_report;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod report;
pub mod resolver;
pub mod store;

pub use config::{IngestConfig, ReportConvention};
pub use error::{IngestError, RowProblem, StoreError};
pub use ingest::{ingest_upload, parse_upload, SourceFormat};
pub use models::{IngestSummary, NormalizedEvent, RawRow, RowError, UploadRequest, UploadType};
