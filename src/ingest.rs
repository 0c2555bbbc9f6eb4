use crate::config::{IngestConfig, ReportConvention};
use crate::delimited::parse_delimited;
use crate::discipline_report::{extract_events, extract_pdf_lines};
use crate::error::IngestError;
use crate::models::{
    DateRange, IngestSummary, NewUpload, NormalizedEvent, RawRow, RowError, UploadRequest,
    UploadType,
};
use crate::normalize::{normalize_row, student_identity};
use crate::resolver::StudentResolver;
use crate::store::Datastore;

/// Rows are numbered from the top of the file and the header is row 1.
const HEADER_ROWS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited,
    DisciplineReport,
}

impl SourceFormat {
    /// PDF when the content type, file extension or magic bytes say so.
    /// Everything else is treated as delimited text.
    pub fn detect(file_name: &str, content_type: Option<&str>, payload: &[u8]) -> Self {
        let is_pdf = content_type
            .is_some_and(|ct| ct.trim().eq_ignore_ascii_case("application/pdf"))
            || file_name.to_lowercase().ends_with(".pdf")
            || payload.starts_with(b"%PDF-");

        if is_pdf {
            Self::DisciplineReport
        } else {
            Self::Delimited
        }
    }
}

/// Checks the replace window and returns it for `replace_range` uploads.
pub fn replace_window(
    upload_type: UploadType,
    start: Option<chrono::NaiveDate>,
    end: Option<chrono::NaiveDate>,
) -> Result<Option<DateRange>, IngestError> {
    if upload_type != UploadType::ReplaceRange {
        return Ok(None);
    }
    let (Some(start), Some(end)) = (start, end) else {
        return Err(IngestError::MissingRange);
    };
    if start > end {
        return Err(IngestError::InvertedRange { start, end });
    }
    Ok(Some(DateRange { start, end }))
}

/// Parses an upload into raw rows.
pub fn parse_upload(
    request: &UploadRequest,
    max_bytes: usize,
    convention: &ReportConvention,
) -> Result<(SourceFormat, Vec<RawRow>), IngestError> {
    let size = request.payload.len();
    if size > max_bytes {
        return Err(IngestError::TooLarge {
            size,
            limit: max_bytes,
        });
    }

    let format = SourceFormat::detect(
        &request.file_name,
        request.content_type.as_deref(),
        &request.payload,
    );
    let rows = match format {
        SourceFormat::DisciplineReport => {
            let lines = extract_pdf_lines(&request.payload)?;
            extract_events(&lines, convention)
        }
        SourceFormat::Delimited => {
            let text = String::from_utf8(request.payload.clone())?;
            parse_delimited(&text)
        }
    };

    if rows.is_empty() {
        return Err(IngestError::EmptyUpload);
    }

    log::info!(
        "Parsed {} rows from {} ({format:?})",
        rows.len(),
        request.file_name
    );

    Ok((format, rows))
}

/// Runs one ingestion call against `store`.
///
/// A failed batch aborts the call and earlier batches stay committed.
pub async fn ingest_upload<S: Datastore>(
    store: &S,
    request: UploadRequest,
    config: &IngestConfig,
) -> Result<IngestSummary, IngestError> {
    let window = replace_window(request.upload_type, request.range_start, request.range_end)?;
    let (_, rows) = parse_upload(&request, config.max_upload_bytes, &config.convention)?;

    let source_system = request
        .source_system
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(config.default_source_system.as_str())
        .to_string();

    let upload_id = store
        .record_upload(&NewUpload {
            uploaded_by: request.uploaded_by.clone(),
            source_system: source_system.clone(),
            file_name: request.file_name.clone(),
            row_count: rows.len(),
            upload_type: request.upload_type,
            range: window,
        })
        .await?;

    let deleted = match (request.upload_type, window) {
        (UploadType::ReplaceAll, _) => store.delete_all_events().await?,
        (UploadType::ReplaceRange, Some(range)) => store.delete_events_in_range(range).await?,
        _ => 0,
    };
    if deleted > 0 {
        log::info!("Removed {deleted} existing events before {}", request.upload_type.as_str());
    }

    let (accepted, errors) = process_rows(store, &rows, &source_system).await;

    let batch_size = config.batch_size.max(1);
    for (index, batch) in accepted.chunks(batch_size).enumerate() {
        let written = store.insert_events(upload_id, batch).await?;
        log::debug!("Inserted batch {} ({written} events)", index + 1);
    }

    let students_notified = notify_insights(store, upload_id, &accepted).await;

    log::info!(
        "Upload {upload_id}: {} accepted, {} rejected of {} rows",
        accepted.len(),
        errors.len(),
        rows.len()
    );

    Ok(IngestSummary {
        upload_id,
        source_system,
        file_name: request.file_name,
        upload_type: request.upload_type,
        rows_parsed: rows.len(),
        accepted: accepted.len(),
        deleted,
        students_notified,
        errors,
    })
}

/// Resolves and normalizes every row in source order.
async fn process_rows<S: Datastore>(
    store: &S,
    rows: &[RawRow],
    source_system: &str,
) -> (Vec<NormalizedEvent>, Vec<RowError>) {
    let mut resolver = StudentResolver::new(store);
    let mut accepted = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let row_number = index + 1 + HEADER_ROWS;
        let outcome = match resolver.resolve(&student_identity(row)).await {
            Ok(student_id) => normalize_row(row, &student_id, source_system),
            Err(problem) => Err(problem),
        };

        match outcome {
            Ok(event) => accepted.push(event),
            Err(problem) => errors.push(RowError {
                row_number,
                message: problem.to_string(),
            }),
        }
    }

    (accepted, errors)
}

/// Returns the number of students handed to the insights consumer, or zero
/// when the request failed.
async fn notify_insights<S: Datastore>(
    store: &S,
    upload_id: uuid::Uuid,
    accepted: &[NormalizedEvent],
) -> usize {
    let mut student_ids: Vec<String> = Vec::new();
    for event in accepted {
        if !student_ids.contains(&event.student_id) {
            student_ids.push(event.student_id.clone());
        }
    }
    if student_ids.is_empty() {
        return 0;
    }

    match store.request_refresh(upload_id, &student_ids).await {
        Ok(()) => student_ids.len(),
        Err(e) => {
            log::warn!("Insights refresh for upload {upload_id} failed: {e}");
            0
        }
    }
}
