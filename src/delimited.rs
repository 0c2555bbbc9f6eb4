use crate::models::RawRow;

/// Lowercases a header cell and folds punctuation runs into `_`.
///
/// `"Student Name"` becomes `student_name`, `"Event-Date "` becomes
/// `event_date`. A leading byte-order mark is dropped.
pub fn normalize_header(value: &str) -> String {
    let trimmed = value.trim().trim_start_matches('\u{feff}').trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut in_gap = false;

    for ch in trimmed.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            in_gap = false;
        } else if !in_gap {
            out.push('_');
            in_gap = true;
        }
    }

    out
}

/// Splits `text` into rows of raw cells.
///
/// Rows whose cells are all blank are dropped.
pub fn tokenize(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if quoted && chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    quoted = !quoted;
                }
            }
            ',' if !quoted => row.push(std::mem::take(&mut field)),
            '\r' | '\n' if !quoted => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                push_row(&mut rows, std::mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }

    row.push(field);
    push_row(&mut rows, row);

    rows
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    if row.iter().any(|cell| !cell.trim().is_empty()) {
        rows.push(row);
    }
}

/// Parses delimited text into header-keyed rows.
///
/// The first non-blank row supplies the column names. Data cells map to
/// headers by position; cells beyond the header are ignored and missing
/// trailing cells read as `""`.
pub fn parse_delimited(text: &str) -> Vec<RawRow> {
    let mut rows = tokenize(text).into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();

    let parsed: Vec<RawRow> = rows
        .map(|cells| {
            headers
                .iter()
                .enumerate()
                .map(|(index, name)| {
                    let value = cells.get(index).map_or("", |cell| cell.trim());
                    (name.clone(), value.to_string())
                })
                .collect()
        })
        .collect();

    log::debug!(
        "Parsed {} delimited rows across {} columns",
        parsed.len(),
        headers.len()
    );

    parsed
}
