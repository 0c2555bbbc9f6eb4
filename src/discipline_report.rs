//! "Discipline Event Summary" reports: a grade heading, a `Last, First`
//! student heading, then one block per event opening with a `DD/MM/YYYY` line.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::config::ReportConvention;
use crate::error::IngestError;
use crate::models::{EventType, RawRow};

static GRADE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d{1,2})(?:st|nd|rd|th)$").expect("valid regex"));
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})/(\d{2})/(\d{4})").expect("valid regex"));
static NOT_STUDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Violation|Description|Resolution|Student Total|Support|MS\s*:|Level")
        .expect("valid regex")
});
static KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bViolation\b|\bSupport\b").expect("valid regex"));
static STUDENT_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)student").expect("valid regex"));
static TRAILING_POINTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+)\s*$").expect("valid regex"));
static SUPPORT_VIOLATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Support Violation").expect("valid regex"));
static VIOLATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Violation").expect("valid regex"));
static MS_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^MS\s*:\s*").expect("valid regex"));
static LEVEL_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Level\s*\d+\s*:\s*").expect("valid regex"));
static DESCRIPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Description").expect("valid regex"));
static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Resolution").expect("valid regex"));
static STUDENT_TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Student Total").expect("valid regex"));

/// Report table header repeated at the top of every page.
const TABLE_HEADER: &str = "Author Details Points";

/// What a single report line means to the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `6th`, `12th`, ... sets the grade for the students that follow.
    GradeMarker(u32),
    /// `Last, First` sets the student for the events that follow.
    StudentMarker,
    /// A line starting with `DD/MM/YYYY`; opens an event.
    EventStart,
    Continuation,
}

/// Tags a trimmed report line.
///
/// A line that starts with a date is always an event start, even when it also
/// contains a comma.
pub fn classify_line(line: &str) -> LineKind {
    if let Some(caps) = GRADE_RE.captures(line) {
        if let Ok(grade) = caps[1].parse() {
            return LineKind::GradeMarker(grade);
        }
    }
    if DATE_RE.is_match(line) {
        return LineKind::EventStart;
    }
    if line.contains(',') && !NOT_STUDENT_RE.is_match(line) {
        return LineKind::StudentMarker;
    }
    LineKind::Continuation
}

/// Splits extracted PDF text into trimmed report lines.
///
/// Blank lines, `--` page separators and repeated table headers are dropped.
pub fn prepare_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--") && !line.contains(TABLE_HEADER))
        .map(str::to_string)
        .collect()
}

/// Extracts the text layer of a PDF and splits it into report lines.
pub fn extract_pdf_lines(bytes: &[u8]) -> Result<Vec<String>, IngestError> {
    // pdf-extract panics on some malformed font tables.
    let text = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    })) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            log::warn!("PDF text extraction failed: {e}");
            return Err(IngestError::Pdf(format!("failed to extract text from PDF: {e}")));
        }
        Err(_) => {
            log::error!("PDF text extraction panicked, likely a malformed font");
            return Err(IngestError::Pdf("PDF text extraction panicked".to_string()));
        }
    };

    log::debug!("Extracted {} characters of text from PDF", text.len());

    Ok(prepare_lines(&text))
}

/// Category, points and type read from an event header such as
/// `Violation Level 2: Disruption 3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderParts {
    pub category: String,
    pub subcategory: String,
    /// Stored point value; `None` when the header has no usable trailing number.
    pub points: Option<i64>,
    pub event_type: EventType,
}

pub fn parse_header_line(header_line: &str, convention: &ReportConvention) -> HeaderParts {
    let (header, raw_points) = match TRAILING_POINTS_RE.captures(header_line) {
        Some(caps) => {
            let start = caps.get(0).map_or(header_line.len(), |m| m.start());
            let raw = caps[1].parse::<i64>().ok();
            (header_line[..start].trim(), raw)
        }
        None => (header_line.trim(), None),
    };

    let (category, subcategory) = if SUPPORT_VIOLATION_RE.is_match(header) {
        (
            "Support Violation",
            SUPPORT_VIOLATION_RE.replace(header, "").trim().to_string(),
        )
    } else if VIOLATION_RE.is_match(header) {
        ("Violation", VIOLATION_RE.replace(header, "").trim().to_string())
    } else {
        ("", header.to_string())
    };

    let subcategory = MS_PREFIX_RE.replace(&subcategory, "").into_owned();
    let subcategory = LEVEL_PREFIX_RE.replace(&subcategory, "").trim().to_string();

    let event_type = if convention.is_merit(header, raw_points) {
        EventType::Merit
    } else {
        EventType::Demerit
    };

    HeaderParts {
        category: category.to_string(),
        subcategory,
        points: raw_points.and_then(|raw| convention.stored_points(raw)),
        event_type,
    }
}

/// Rewrites a `DD/MM/YYYY` report date as `YYYY-MM-DD`.
///
/// Impossible dates are passed through untouched so the row is rejected
/// later with the usual date error.
fn report_date_to_iso(raw: &str) -> String {
    let parsed = DATE_RE.captures(raw).and_then(|caps| {
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    });

    parsed.map_or_else(|| raw.to_string(), |date| date.format("%Y-%m-%d").to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// The event line named no category; the next line is the header.
    AwaitingHeaderLine,
    /// Header read, no `Description`/`Resolution` section seen yet.
    EventBody,
    AccumulatingDescription,
    AccumulatingResolution,
}

/// Result of feeding one line to the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Advance,
    /// The line closed the open event and must be fed again.
    Reprocess,
}

#[derive(Debug)]
struct OpenEvent {
    student_name: String,
    grade: Option<u32>,
    event_date: String,
    staff_name: String,
    header_line: String,
    description: String,
    resolution: String,
}

impl OpenEvent {
    fn notes(&self) -> String {
        [self.description.trim(), self.resolution.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Line-at-a-time extractor over report text.
pub struct ReportExtractor<'a> {
    convention: &'a ReportConvention,
    grade: Option<u32>,
    student: Option<String>,
    state: State,
    open: Option<OpenEvent>,
    rows: Vec<RawRow>,
}

impl<'a> ReportExtractor<'a> {
    pub fn new(convention: &'a ReportConvention) -> Self {
        Self {
            convention,
            grade: None,
            student: None,
            state: State::Idle,
            open: None,
            rows: Vec::new(),
        }
    }

    pub fn step(&mut self, line: &str) -> Step {
        match self.state {
            State::Idle => {
                self.step_idle(line);
                Step::Advance
            }
            State::AwaitingHeaderLine => {
                if let Some(open) = self.open.as_mut() {
                    open.header_line = line.to_string();
                }
                self.state = State::EventBody;
                Step::Advance
            }
            State::EventBody | State::AccumulatingDescription | State::AccumulatingResolution => {
                self.step_body(line)
            }
        }
    }

    fn step_idle(&mut self, line: &str) {
        match classify_line(line) {
            LineKind::GradeMarker(grade) => self.grade = Some(grade),
            LineKind::StudentMarker => self.student = Some(line.to_string()),
            LineKind::EventStart => {
                if let Some(student) = self.student.clone() {
                    self.open_event(student, line);
                }
            }
            LineKind::Continuation => {}
        }
    }

    fn open_event(&mut self, student_name: String, line: &str) {
        let date_len = DATE_RE.find(line).map_or(0, |m| m.end());
        let event_date = report_date_to_iso(&line[..date_len]);
        let remainder = line[date_len..].trim();
        let remainder = remainder.strip_prefix(',').unwrap_or(remainder).trim();

        let (staff_part, header_line) = match KEYWORD_RE.find(remainder) {
            Some(keyword) => {
                let staff = remainder[..keyword.start()].trim();
                (
                    staff.strip_suffix(',').unwrap_or(staff),
                    Some(remainder[keyword.start()..].trim().to_string()),
                )
            }
            None => (remainder, None),
        };
        let staff_name = if staff_part.is_empty() || STUDENT_WORD_RE.is_match(staff_part) {
            String::new()
        } else {
            staff_part.to_string()
        };

        self.state = if header_line.is_some() {
            State::EventBody
        } else {
            State::AwaitingHeaderLine
        };
        self.open = Some(OpenEvent {
            student_name,
            grade: self.grade,
            event_date,
            staff_name,
            header_line: header_line.unwrap_or_default(),
            description: String::new(),
            resolution: String::new(),
        });
    }

    fn step_body(&mut self, line: &str) -> Step {
        if !matches!(classify_line(line), LineKind::Continuation) {
            self.close_event();
            return Step::Reprocess;
        }

        if DESCRIPTION_RE.is_match(line) {
            self.state = State::AccumulatingDescription;
            let text = DESCRIPTION_RE.replace(line, "");
            self.append_section(text.trim());
        } else if RESOLUTION_RE.is_match(line) {
            self.state = State::AccumulatingResolution;
            let text = RESOLUTION_RE.replace(line, "");
            self.append_section(text.trim());
        } else if STUDENT_TOTAL_RE.is_match(line) {
            self.close_event();
        } else {
            self.append_section(line);
        }

        Step::Advance
    }

    fn append_section(&mut self, text: &str) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        let buffer = match self.state {
            State::AccumulatingDescription => &mut open.description,
            State::AccumulatingResolution => &mut open.resolution,
            _ => return,
        };
        buffer.push_str(text);
        buffer.push(' ');
    }

    fn close_event(&mut self) {
        self.state = State::Idle;
        let Some(open) = self.open.take() else {
            return;
        };

        let header = parse_header_line(&open.header_line, self.convention);
        let notes = open.notes();
        let points = header.points.map_or_else(|| "0".to_string(), |p| p.to_string());
        let grade = open.grade.map(|g| g.to_string()).unwrap_or_default();

        let row: RawRow = [
            ("student_name", open.student_name),
            ("grade", grade),
            ("section", String::new()),
            ("event_type", header.event_type.as_str().to_string()),
            ("event_date", open.event_date),
            ("staff_name", open.staff_name),
            ("category", header.category),
            ("subcategory", header.subcategory),
            ("points", points),
            ("notes", notes),
            ("source_system", self.convention.source_label.clone()),
        ]
        .into_iter()
        .collect();

        self.rows.push(row);
    }

    /// Closes any event still open at end of input and returns the rows.
    pub fn finish(mut self) -> Vec<RawRow> {
        if self.state != State::Idle {
            self.close_event();
        }
        self.rows
    }
}

/// Runs the extractor over prepared report lines.
pub fn extract_events<S: AsRef<str>>(lines: &[S], convention: &ReportConvention) -> Vec<RawRow> {
    let mut extractor = ReportExtractor::new(convention);
    let mut index = 0;

    while let Some(line) = lines.get(index) {
        match extractor.step(line.as_ref()) {
            Step::Advance => index += 1,
            Step::Reprocess => {}
        }
    }

    let rows = extractor.finish();
    log::debug!("Extracted {} events from {} report lines", rows.len(), lines.len());
    rows
}
