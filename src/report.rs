use std::fmt::Write;
use std::path::Path;

use crate::models::{IngestSummary, RowError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemSummary {
    pub message: String,
    pub count: usize,
    pub first_row: usize,
}

/// Groups row errors by message, most frequent first.
pub fn summarize_by_message(errors: &[RowError]) -> Vec<ProblemSummary> {
    let mut summaries: Vec<ProblemSummary> = Vec::new();

    for error in errors {
        match summaries.iter_mut().find(|s| s.message == error.message) {
            Some(summary) => {
                summary.count += 1;
                summary.first_row = summary.first_row.min(error.row_number);
            }
            None => summaries.push(ProblemSummary {
                message: error.message.clone(),
                count: 1,
                first_row: error.row_number,
            }),
        }
    }

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.first_row.cmp(&b.first_row)));
    summaries
}

pub fn build_report(summary: &IngestSummary) -> String {
    let problems = summarize_by_message(&summary.errors);
    let mut output = String::new();

    let _ = writeln!(output, "# Behaviour Upload Report");
    let _ = writeln!(
        output,
        "Upload {} from {} ({}, {})",
        summary.upload_id,
        summary.file_name,
        summary.source_system,
        summary.upload_type.as_str()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Totals");
    let _ = writeln!(output, "- Rows parsed: {}", summary.rows_parsed);
    let _ = writeln!(output, "- Events accepted: {}", summary.accepted);
    let _ = writeln!(output, "- Rows rejected: {}", summary.errors.len());
    if summary.deleted > 0 {
        let _ = writeln!(output, "- Existing events replaced: {}", summary.deleted);
    }
    let _ = writeln!(
        output,
        "- Students queued for insight refresh: {}",
        summary.students_notified
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Problems");

    if problems.is_empty() {
        let _ = writeln!(output, "Every row was accepted.");
    } else {
        for problem in &problems {
            let _ = writeln!(
                output,
                "- {} ({} rows, first at row {})",
                problem.message, problem.count, problem.first_row
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Rejected Rows");

    if summary.errors.is_empty() {
        let _ = writeln!(output, "None.");
    } else {
        for error in summary.errors.iter().take(25) {
            let _ = writeln!(output, "- Row {}: {}", error.row_number, error.message);
        }
        if summary.errors.len() > 25 {
            let _ = writeln!(output, "- ... and {} more", summary.errors.len() - 25);
        }
    }

    output
}

pub fn write_errors_csv<W: std::io::Write>(writer: W, errors: &[RowError]) -> anyhow::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for error in errors {
        csv_writer.serialize(error)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_errors_csv_file(path: &Path, errors: &[RowError]) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    write_errors_csv(file, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadType;
    use uuid::Uuid;

    fn error(row_number: usize, message: &str) -> RowError {
        RowError {
            row_number,
            message: message.to_string(),
        }
    }

    fn summary(errors: Vec<RowError>) -> IngestSummary {
        IngestSummary {
            upload_id: Uuid::nil(),
            source_system: "csv_upload".to_string(),
            file_name: "events.csv".to_string(),
            upload_type: UploadType::Append,
            rows_parsed: 10,
            accepted: 10 - errors.len(),
            deleted: 0,
            students_notified: 4,
            errors,
        }
    }

    #[test]
    fn groups_messages_by_frequency() {
        let errors = vec![
            error(9, "points is required and must be a number."),
            error(4, "Unable to resolve student_id for row."),
            error(3, "points is required and must be a number."),
        ];
        let problems = summarize_by_message(&errors);
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].count, 2);
        assert_eq!(problems[0].first_row, 3);
        assert_eq!(problems[1].message, "Unable to resolve student_id for row.");
    }

    #[test]
    fn report_lists_totals_and_rejections() {
        let report = build_report(&summary(vec![error(
            6,
            "points is required and must be a number.",
        )]));
        assert!(report.contains("- Events accepted: 9"));
        assert!(report.contains("- Row 6: points is required and must be a number."));
        assert!(!report.contains("replaced"));
    }

    #[test]
    fn clean_upload_report() {
        let report = build_report(&summary(Vec::new()));
        assert!(report.contains("Every row was accepted."));
    }

    #[test]
    fn errors_export_as_csv() {
        let mut buffer = Vec::new();
        write_errors_csv(&mut buffer, &[error(6, "event_type must be merit or demerit.")]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "row_number,message\n6,event_type must be merit or demerit.\n");
    }
}
