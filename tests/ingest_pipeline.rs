use chrono::NaiveDate;
use merit_ingest::discipline_report::{extract_events, prepare_lines};
use merit_ingest::models::{EventType, NormalizedEvent};
use merit_ingest::normalize::{normalize_row, student_identity};
use merit_ingest::resolver::StudentResolver;
use merit_ingest::store::memory::MemoryStore;
use merit_ingest::{
    ingest_upload, IngestConfig, IngestError, ReportConvention, RowProblem, UploadRequest,
    UploadType,
};

const HEADER: &str = "student_name,grade,section,event_type,event_date,points,category";

fn directory() -> MemoryStore {
    MemoryStore::new()
        .with_student("S-1", "Lee, Avery", Some(7), Some("A"))
        .with_student("S-2", "Moreno, Jules", Some(8), Some("B"))
        .with_student("S-3", "Patel, Kiara", Some(7), Some("B"))
        .with_student("S-4", "Patel, Kiara", Some(8), Some("A"))
}

fn csv_request(lines: &[&str]) -> UploadRequest {
    let mut text = String::from(HEADER);
    for line in lines {
        text.push('\n');
        text.push_str(line);
    }
    UploadRequest::new("events.csv", text.into_bytes())
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn stored_event(student_id: &str, event_date: NaiveDate) -> NormalizedEvent {
    NormalizedEvent {
        student_id: student_id.to_string(),
        student_name: None,
        grade: None,
        section: None,
        event_type: EventType::Demerit,
        event_date,
        event_time: None,
        points: 1,
        category: None,
        subcategory: None,
        severity: None,
        staff_id: None,
        staff_name: None,
        class_context: None,
        location: None,
        notes: None,
        source_system: None,
    }
}

#[tokio::test]
async fn bad_rows_are_reported_and_the_rest_land() {
    let store = directory();
    let request = csv_request(&[
        "\"Lee, Avery\",7,A,merit,2026-02-02,2,Homework",
        "\"Moreno, Jules\",8,B,demerit,2026-02-02,1,Late",
        "\"Lee, Avery\",7,A,demerit,2026-02-03,3,Uniform",
        "\"Moreno, Jules\",8,,MERIT,02/04/2026,5,Effort",
        "\"Lee, Avery\",7,A,demerit,2026-02-04,three,Late",
        "\"Patel, Kiara\",7,,merit,2026-02-05,2,Helping",
        "\"Patel, Kiara\",8,A,demerit,2026-02-05,1,Late",
        "\"Okafor, Dami\",6,A,merit,2026-02-06,1,Effort",
        "\"Lee, Avery\",7,A,merit,2026-02-06,4,Reading",
        "\"Moreno, Jules\",8,B,merit,2026-02-07,1,Homework",
    ]);

    let summary = ingest_upload(&store, request, &IngestConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.rows_parsed, 10);
    assert_eq!(summary.accepted, 8);
    assert_eq!(summary.errors.len(), 2);
    assert_eq!(summary.errors[0].row_number, 6);
    assert_eq!(summary.errors[0].message, "points is required and must be a number.");
    assert_eq!(summary.errors[1].row_number, 9);
    assert_eq!(summary.errors[1].message, "Unable to resolve student_id for row.");

    let events = store.events();
    assert_eq!(events.len(), 8);
    assert!(events.iter().all(|stored| stored.upload_id == summary.upload_id));
    assert_eq!(events[3].event.event_date, date(2026, 2, 4));
    assert_eq!(events[3].event.event_type, EventType::Merit);
    assert_eq!(events[3].event.source_system.as_deref(), Some("csv_upload"));

    // Avery (7/A) and Jules (8/B) repeat; each distinct tuple is looked up once.
    assert_eq!(store.lookup_count(), 6);
}

#[tokio::test]
async fn ambiguous_names_need_more_detail() {
    let store = directory();
    let request = UploadRequest::new(
        "events.csv",
        b"name,type,date,points\n\
          Patel, Kiara,merit,2026-02-05,1\n\
          \"Patel, Kiara\",merit,2026-02-05,1\n"
            .to_vec(),
    );

    let summary = ingest_upload(&store, request, &IngestConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.accepted, 0);
    assert_eq!(summary.errors.len(), 2);
    assert_eq!(summary.errors[0].message, "Unable to resolve student_id for row.");
    assert_eq!(
        summary.errors[1].message,
        "Multiple students match. Provide section to disambiguate."
    );
}

#[tokio::test]
async fn explicit_ids_and_audit_record() {
    let store = directory();
    let mut request = UploadRequest::new(
        "sis-export.csv",
        b"Student ID,Event Type,Event Date,Event Time,Points,Severity,Source System\n\
          X-77,demerit,2026-03-01,14:05,2,Major,\n\
          X-78,merit,2026-03-01,bad,1,,SIS\n"
            .to_vec(),
    );
    request.source_system = Some("sis_nightly".to_string());
    request.uploaded_by = Some("staff-12".to_string());

    let summary = ingest_upload(&store, request, &IngestConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.accepted, 2);
    assert_eq!(store.lookup_count(), 0);

    let events = store.events();
    assert_eq!(events[0].event.student_id, "X-77");
    assert_eq!(events[0].event.source_system.as_deref(), Some("sis_nightly"));
    assert!(events[0].event.event_time.is_some());
    assert_eq!(events[1].event.source_system.as_deref(), Some("SIS"));
    assert_eq!(events[1].event.event_time, None);

    let uploads = store.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, summary.upload_id);
    assert_eq!(uploads[0].1.file_name, "sis-export.csv");
    assert_eq!(uploads[0].1.row_count, 2);
    assert_eq!(uploads[0].1.uploaded_by.as_deref(), Some("staff-12"));

    let refreshes = store.refresh_requests();
    assert_eq!(refreshes.len(), 1);
    assert_eq!(refreshes[0].1, vec!["X-77", "X-78"]);
    assert_eq!(summary.students_notified, 2);
}

#[tokio::test]
async fn replace_range_without_end_date_touches_nothing() {
    let store = directory().with_events(vec![stored_event("S-1", date(2026, 1, 10))]);
    let mut request = csv_request(&["\"Lee, Avery\",7,A,merit,2026-01-10,1,Effort"]);
    request.upload_type = UploadType::ReplaceRange;
    request.range_start = Some(date(2026, 1, 1));

    let result = ingest_upload(&store, request, &IngestConfig::default()).await;

    assert!(matches!(result, Err(IngestError::MissingRange)));
    assert_eq!(store.delete_calls(), 0);
    assert_eq!(store.insert_calls(), 0);
    assert!(store.uploads().is_empty());
    assert_eq!(store.events().len(), 1);
}

#[tokio::test]
async fn replace_range_only_removes_events_inside_the_window() {
    let store = directory().with_events(vec![
        stored_event("S-1", date(2025, 12, 31)),
        stored_event("S-1", date(2026, 1, 1)),
        stored_event("S-2", date(2026, 1, 31)),
        stored_event("S-2", date(2026, 2, 1)),
    ]);
    let mut request = csv_request(&["\"Lee, Avery\",7,A,merit,2026-01-15,1,Effort"]);
    request.upload_type = UploadType::ReplaceRange;
    request.range_start = Some(date(2026, 1, 1));
    request.range_end = Some(date(2026, 1, 31));

    let summary = ingest_upload(&store, request, &IngestConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.deleted, 2);
    let mut dates: Vec<NaiveDate> = store.events().iter().map(|s| s.event.event_date).collect();
    dates.sort();
    assert_eq!(dates, vec![date(2025, 12, 31), date(2026, 1, 15), date(2026, 2, 1)]);
}

#[tokio::test]
async fn replace_all_clears_existing_events() {
    let store = directory().with_events(vec![
        stored_event("S-1", date(2025, 9, 1)),
        stored_event("S-2", date(2026, 1, 1)),
    ]);
    let mut request = csv_request(&["\"Lee, Avery\",7,A,merit,2026-01-15,1,Effort"]);
    request.upload_type = UploadType::ReplaceAll;

    let summary = ingest_upload(&store, request, &IngestConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.deleted, 2);
    assert_eq!(store.events().len(), 1);
}

#[tokio::test]
async fn payload_over_the_ceiling_is_refused() {
    let store = directory();
    let ceiling = 10 * 1024 * 1024;
    let mut payload =
        format!("{HEADER}\n\"Lee, Avery\",7,A,merit,2026-01-15,1,Effort\n").into_bytes();
    payload.resize(ceiling + 1, b' ');

    let result = ingest_upload(
        &store,
        UploadRequest::new("events.csv", payload),
        &IngestConfig::default(),
    )
    .await;

    assert!(matches!(
        result,
        Err(IngestError::TooLarge { size, limit: 10_485_760 }) if size == ceiling + 1
    ));
    assert!(store.uploads().is_empty());
}

#[tokio::test]
async fn empty_file_is_a_call_level_failure() {
    let store = directory();
    let result = ingest_upload(
        &store,
        UploadRequest::new("events.csv", format!("{HEADER}\n\n\n").into_bytes()),
        &IngestConfig::default(),
    )
    .await;

    assert!(matches!(result, Err(IngestError::EmptyUpload)));
    assert!(store.uploads().is_empty());
}

fn bulk_request(rows: usize) -> UploadRequest {
    let mut text = String::from("student_id,event_type,event_date,points\n");
    for i in 0..rows {
        text.push_str(&format!("S-{},merit,2026-01-05,1\n", i % 40));
    }
    UploadRequest::new("bulk.csv", text.into_bytes())
}

#[tokio::test]
async fn inserts_go_out_in_batches_of_five_hundred() {
    let store = MemoryStore::new();
    let summary = ingest_upload(&store, bulk_request(1201), &IngestConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.accepted, 1201);
    assert_eq!(store.insert_calls(), 3);
    assert_eq!(store.events().len(), 1201);
    assert_eq!(summary.students_notified, 40);
}

#[tokio::test]
async fn failed_batch_aborts_and_keeps_earlier_batches() {
    let store = MemoryStore::new().failing_insert_call(2);
    let result = ingest_upload(&store, bulk_request(1201), &IngestConfig::default()).await;

    assert!(matches!(result, Err(IngestError::Store(_))));
    assert_eq!(store.insert_calls(), 2);
    assert_eq!(store.events().len(), 500);
    assert!(store.refresh_requests().is_empty());
}

#[tokio::test]
async fn insights_failure_does_not_undo_the_upload() {
    let store = directory().failing_refresh();
    let request = csv_request(&["\"Lee, Avery\",7,A,merit,2026-01-15,1,Effort"]);

    let summary = ingest_upload(&store, request, &IngestConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.students_notified, 0);
    assert_eq!(store.events().len(), 1);
}

const REPORT: &str = "\
Discipline Event Summary
Date Author Details Points
7th
Lee, Avery
03/02/2026 Ms. Grant Violation Level 2: Disruption 3
Description Talking during the assessment
Student Total 3
8th
Patel, Kiara
04/02/2026 Mr. Okafor
Support Violation Buy Back -2
Student Total -2
Okafor, Dami
05/02/2026 Mr. Okafor Violation Late 1
-- 1 of 1 --
";

#[tokio::test]
async fn report_rows_resolve_and_normalize_like_spreadsheet_rows() {
    let store = directory();
    let rows = extract_events(&prepare_lines(REPORT), &ReportConvention::default());
    assert_eq!(rows.len(), 3);

    let mut resolver = StudentResolver::new(&store);
    let mut outcomes = Vec::new();
    for row in &rows {
        let outcome = match resolver.resolve(&student_identity(row)).await {
            Ok(student_id) => normalize_row(row, &student_id, "csv_upload"),
            Err(problem) => Err(problem),
        };
        outcomes.push(outcome);
    }

    let avery = outcomes[0].as_ref().unwrap();
    assert_eq!(avery.student_id, "S-1");
    assert_eq!(avery.grade, Some(7));
    assert_eq!(avery.section, None);
    assert_eq!(avery.event_date, date(2026, 2, 3));
    assert_eq!(avery.event_type, EventType::Demerit);
    assert_eq!(avery.points, 3);
    assert_eq!(avery.subcategory.as_deref(), Some("Disruption"));
    assert_eq!(avery.staff_name.as_deref(), Some("Ms. Grant"));
    assert_eq!(avery.source_system.as_deref(), Some("Discipline Event Summary PDF"));

    // Two Kiara Patels exist; the grade heading picks the 8th grader.
    let kiara = outcomes[1].as_ref().unwrap();
    assert_eq!(kiara.student_id, "S-4");
    assert_eq!(kiara.event_type, EventType::Merit);
    assert_eq!(kiara.points, 2);
    assert_eq!(kiara.event_date, date(2026, 2, 4));

    assert_eq!(outcomes[2], Err(RowProblem::UnresolvedStudent));
}
