// src/process/mod.rs
pub mod render;

use csv::{ReaderBuilder, Trim};
use std::collections::HashSet;
use tracing::trace;

use crate::error::{ParseError, ParseErrorKind};
use crate::schema::Table;

pub use render::render_table;

/// Parse table text handed over by a producer.
///
/// Producers occasionally wrap their CSV in a markdown code fence; one
/// surrounding fence is removed before the text is parsed with [`parse_csv`].
pub fn parse_table(text: &str) -> Result<Table, ParseError> {
    parse_csv(strip_code_fence(text)).map_err(|e| ParseError::new(e.kind, text))
}

/// How closely CSV text is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Producer output: padding is trimmed, records with no content skipped.
    Lenient,
    /// Persisted datasets: every byte and every record is kept.
    Exact,
}

fn reader(mode: Mode) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.has_headers(true).flexible(true);
    if mode == Mode::Lenient {
        builder.trim(Trim::All);
    }
    builder
}

/// Parse comma-separated text whose first record is the header.
///
/// - header names and cells are trimmed; empty cells become `None`
/// - records with no content at all are skipped
/// - every other record must have exactly as many fields as the header
/// - header names must be non-empty and unique
/// - a quoted field must be closed before the end of the text
///
/// A header with no data rows is a valid empty table.
pub fn parse_csv(text: &str) -> Result<Table, ParseError> {
    read_table(text, Mode::Lenient)
}

/// Parse a persisted dataset, as written by [`render_table`]. Nothing is
/// trimmed and a record of empty fields is a row of absent cells, so a table
/// reads back exactly as it was written (an empty string cell reads back as
/// `None`).
pub fn parse_dataset(text: &str) -> Result<Table, ParseError> {
    read_table(text, Mode::Exact)
}

fn read_table(text: &str, mode: Mode) -> Result<Table, ParseError> {
    check_quotes(text)?;
    let mut rdr = reader(mode).from_reader(text.as_bytes());

    let columns = read_columns(&mut rdr, text)?;
    let mut table = Table::new(columns);
    let expected = table.columns.len();

    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result
            .map_err(|e| ParseError::new(ParseErrorKind::Malformed(e.to_string()), text))?;

        if mode == Mode::Lenient && record.iter().all(str::is_empty) {
            skipped += 1;
            continue;
        }
        if record.len() != expected {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(ParseError::new(
                ParseErrorKind::FieldCount {
                    line,
                    expected,
                    found: record.len(),
                },
                text,
            ));
        }

        table.rows.push(
            record
                .iter()
                .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                .collect(),
        );
    }

    if skipped > 0 {
        trace!(skipped, "skipped blank records");
    }
    Ok(table)
}

/// Read only the header of a persisted dataset.
pub fn parse_header(text: &str) -> Result<Vec<String>, ParseError> {
    let mut rdr = reader(Mode::Exact).from_reader(text.as_bytes());
    read_columns(&mut rdr, text)
}

/// Reject text that ends inside a quoted field; the reader would otherwise
/// fold everything after the opening quote into one cell. A quote only opens
/// a field at the field's first byte, as in the reader.
fn check_quotes(text: &str) -> Result<(), ParseError> {
    #[derive(Clone, Copy)]
    enum State {
        FieldStart,
        Unquoted,
        Quoted,
        QuoteInQuoted,
    }

    let mut state = State::FieldStart;
    let mut line = 1u64;
    let mut opened_on = line;
    for b in text.bytes() {
        state = match (state, b) {
            (State::Quoted, b'"') => State::QuoteInQuoted,
            (State::Quoted, _) => State::Quoted,
            (State::QuoteInQuoted, b'"') => State::Quoted,
            (State::FieldStart, b'"') => {
                opened_on = line;
                State::Quoted
            }
            (_, b',' | b'\n' | b'\r') => State::FieldStart,
            _ => State::Unquoted,
        };
        if b == b'\n' {
            line += 1;
        }
    }

    match state {
        State::Quoted => Err(ParseError::new(
            ParseErrorKind::Malformed(format!(
                "quoted field opened on line {} is never closed",
                opened_on
            )),
            text,
        )),
        _ => Ok(()),
    }
}

fn read_columns<R: std::io::Read>(
    rdr: &mut csv::Reader<R>,
    text: &str,
) -> Result<Vec<String>, ParseError> {
    let header = rdr
        .headers()
        .map_err(|e| ParseError::new(ParseErrorKind::Malformed(e.to_string()), text))?;

    if header.is_empty() || header.iter().all(str::is_empty) {
        return Err(ParseError::new(ParseErrorKind::MissingHeader, text));
    }

    let mut seen = HashSet::with_capacity(header.len());
    let mut columns = Vec::with_capacity(header.len());
    for (index, name) in header.iter().enumerate() {
        if name.is_empty() {
            return Err(ParseError::new(
                ParseErrorKind::EmptyColumnName { index },
                text,
            ));
        }
        if !seen.insert(name) {
            return Err(ParseError::new(
                ParseErrorKind::DuplicateColumn(name.to_string()),
                text,
            ));
        }
        columns.push(name.to_string());
    }
    Ok(columns)
}

/// Remove one surrounding markdown code fence (with optional language tag).
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };
    match body.find('\n') {
        Some(idx) => &body[idx + 1..],
        None => "",
    }
}
