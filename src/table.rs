// src/table.rs
//! Fixed-format table parser for station source files.
//!
//! The devices in the fleet upload two incompatible layouts:
//! - `Simple`: line 1 is the header, everything after is data. Rows whose
//!   column count differs from the header are tail-of-file noise and are
//!   skipped silently.
//! - `Banked`: line 1 is file metadata, line 2 is the header, lines 3–4 are
//!   units/type banners, line 5+ is data. Short rows are skipped; long rows
//!   are truncated to the header width (trailing extras are a device quirk).
//!
//! The layout is selected by the caller per use case, never sniffed from the
//! file content.

use std::collections::HashMap;

use thiserror::Error;

/// One parsed data line: trimmed column name → raw string value.
pub type RawRecord = HashMap<String, String>;

/// A parsed file: the header (in file order) plus the surviving data rows.
///
/// The header is kept alongside the rows because column resolution is
/// positional ("first match wins") and `RawRecord` has no ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub header: Vec<String>,
    pub rows: Vec<RawRecord>,
}

impl ParsedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Header on line 1, data from line 2.
    Simple,
    /// Metadata banner, header on line 2, units/type banners on lines 3–4.
    Banked,
}

#[derive(Debug, Error)]
pub enum ParseError {
    /// The header row is absent or empty; the whole file is unusable.
    #[error("header row is missing or empty")]
    InvalidHeader,
}

/// Parse raw file content into records according to `layout`.
///
/// Never fails on a single malformed row; only an unusable header is an
/// error. Running this twice on the same content yields identical output.
pub fn parse_table(content: &str, layout: Layout) -> Result<ParsedTable, ParseError> {
    let lines = tokenize(content);

    let (header_idx, data_start) = match layout {
        Layout::Simple => (0, 1),
        Layout::Banked => (1, 4),
    };

    let header = match lines.get(header_idx) {
        Some(raw) => normalize_header(raw),
        None => return Err(ParseError::InvalidHeader),
    };
    if header.is_empty() {
        return Err(ParseError::InvalidHeader);
    }

    let mut rows = Vec::new();
    for raw in lines.iter().skip(data_start) {
        let fields = match layout {
            Layout::Simple => {
                if raw.len() != header.len() {
                    continue; // tail-of-file noise
                }
                &raw[..]
            }
            Layout::Banked => {
                if raw.len() < header.len() {
                    continue;
                }
                &raw[..header.len()]
            }
        };
        let record: RawRecord = header
            .iter()
            .cloned()
            .zip(fields.iter().map(|v| v.trim().to_string()))
            .collect();
        rows.push(record);
    }

    Ok(ParsedTable { header, rows })
}

/// Split the content into comma-delimited fields per line. Fields may be
/// double-quoted with backslash escapes. Garbled lines (e.g. an unterminated
/// quote in a partially written tail) are dropped, not an error.
fn tokenize(content: &str) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .escape(Some(b'\\'))
        .from_reader(content.as_bytes());

    reader
        .records()
        .filter_map(|rec| rec.ok())
        .map(|rec| rec.iter().map(|f| f.to_string()).collect())
        .collect()
}

/// Trim header names and drop a trailing empty column left behind by a
/// trailing delimiter.
fn normalize_header(raw: &[String]) -> Vec<String> {
    let mut header: Vec<String> = raw.iter().map(|h| h.trim().to_string()).collect();
    while header.last().is_some_and(|h| h.is_empty()) {
        header.pop();
    }
    header
}
