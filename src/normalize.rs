use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;

use crate::error::RowProblem;
use crate::models::{EventType, NormalizedEvent, RawRow, Severity};

static YMD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})$").expect("valid regex"));
static MDY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[-/](\d{1,2})[-/](\d{4})$").expect("valid regex"));
static LEADING_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+").expect("valid regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?$").expect("valid regex"));

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const LONG_DATE_FORMATS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"];

/// Parses a calendar date in any of the common spreadsheet shapes.
///
/// Accepts `2026-1-5`, `2026/01/05`, month-first `01/05/2026`, RFC 3339
/// timestamps (taken in UTC), naive timestamps and long forms such as
/// `January 5, 2026`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(caps) = YMD_RE.captures(value) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Some(caps) = MDY_RE.captures(value) {
        let month = caps[1].parse().ok()?;
        let day = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            LONG_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        })
}

/// Parses `H:MM`, `HH:MM` or either with `:SS`. Seconds default to zero.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let caps = TIME_RE.captures(value.trim())?;
    let hours = caps[1].parse().ok()?;
    let minutes = caps[2].parse().ok()?;
    let seconds = caps.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
    NaiveTime::from_hms_opt(hours, minutes, seconds)
}

/// Reads the leading base-10 integer, so `3.0` is 3 and `7th` is 7.
/// `None` when the value does not start with digits.
pub fn parse_int(value: &str) -> Option<i64> {
    let digits = LEADING_INT_RE.find(value.trim())?.as_str();
    digits.strip_prefix('+').unwrap_or(digits).parse().ok()
}

pub fn parse_event_type(value: &str) -> Option<EventType> {
    match value.trim().to_lowercase().as_str() {
        "merit" => Some(EventType::Merit),
        "demerit" => Some(EventType::Demerit),
        _ => None,
    }
}

pub fn parse_severity(value: &str) -> Option<Severity> {
    match value.trim().to_lowercase().as_str() {
        "minor" => Some(Severity::Minor),
        "moderate" => Some(Severity::Moderate),
        "major" => Some(Severity::Major),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_grade(value: &str) -> Option<i32> {
    parse_int(value)
        .and_then(|grade| i32::try_from(grade).ok())
        .filter(|grade| *grade >= 0)
}

/// Who a row is about, before resolution against the student directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentIdentity {
    pub explicit_id: Option<String>,
    pub name: Option<String>,
    pub grade: Option<i32>,
    pub section: Option<String>,
}

pub fn student_identity(row: &RawRow) -> StudentIdentity {
    StudentIdentity {
        explicit_id: non_empty(row.first_of(&["student_id", "student_uuid"])),
        name: non_empty(row.first_of(&["student_name", "name"])),
        grade: parse_grade(row.get("grade")),
        section: non_empty(row.get("section")),
    }
}

/// Builds a validated event for `student_id` from `row`.
///
/// Required fields are checked in a fixed order so the reported problem is
/// stable: student, event type, event date, points.
pub fn normalize_row(
    row: &RawRow,
    student_id: &str,
    fallback_source: &str,
) -> Result<NormalizedEvent, RowProblem> {
    let student_id = student_id.trim();
    if student_id.is_empty() {
        return Err(RowProblem::MissingStudent);
    }

    let identity = student_identity(row);
    let event_type = parse_event_type(row.first_of(&["event_type", "type"]))
        .ok_or(RowProblem::InvalidEventType)?;
    let event_date =
        parse_date(row.first_of(&["event_date", "date"])).ok_or(RowProblem::InvalidEventDate)?;
    let points = parse_int(row.get("points"))
        .and_then(|points| i32::try_from(points).ok())
        .ok_or(RowProblem::InvalidPoints)?;

    Ok(NormalizedEvent {
        student_id: student_id.to_string(),
        student_name: identity.name,
        grade: identity.grade,
        section: identity.section,
        event_type,
        event_date,
        event_time: parse_time(row.first_of(&["event_time", "time"])),
        points,
        category: non_empty(row.get("category")),
        subcategory: non_empty(row.get("subcategory")),
        severity: parse_severity(row.get("severity")),
        staff_id: non_empty(row.first_of(&["staff_id", "staff_uuid"])),
        staff_name: non_empty(row.get("staff_name")),
        class_context: non_empty(row.get("class_context")),
        location: non_empty(row.get("location")),
        notes: non_empty(row.get("notes")),
        source_system: non_empty(row.get("source_system")).or_else(|| non_empty(fallback_source)),
    })
}
