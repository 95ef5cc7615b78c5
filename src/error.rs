// src/error.rs

use std::{io, path::PathBuf};
use thiserror::Error;

use crate::store::Location;

/// What was wrong with a piece of table text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("no header line")]
    MissingHeader,
    #[error("header column {index} has an empty name")]
    EmptyColumnName { index: usize },
    #[error("header names column `{0}` more than once")]
    DuplicateColumn(String),
    #[error("line {line} has {found} fields, header has {expected}")]
    FieldCount {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("{0}")]
    Malformed(String),
}

/// Table text that could not be turned into a [`crate::Table`].
/// Carries the offending text so the caller can log or surface it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed table text: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub text: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
        }
    }
}

/// Failures of the dataset store. Any of these leaves the previously
/// committed artifact for the key untouched.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dataset at {location} is corrupt: {source}")]
    Corrupt {
        location: Location,
        #[source]
        source: ParseError,
    },
    #[error("reading {location}: {source}")]
    Read {
        location: Location,
        #[source]
        source: io::Error,
    },
    #[error("replacing {location}: {source}")]
    Replace {
        location: Location,
        #[source]
        source: io::Error,
    },
    #[error("serializing dataset `{key}`: {source}")]
    Serialize {
        key: String,
        #[source]
        source: csv::Error,
    },
    #[error("preparing data directory {dir}: {source}")]
    Init {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("listing datasets in {dir}: {reason}")]
    List { dir: PathBuf, reason: String },
    #[error("store task for `{key}` did not complete: {reason}")]
    Interrupted { key: String, reason: String },
}

/// Per-category failure reported by the accumulation driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("category detection failed: {0}")]
    Detection(String),
    #[error("extraction for `{category}` failed: {reason}")]
    Extraction { category: String, reason: String },
}

impl DriverError {
    /// Short machine-friendly label used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::Parse(_) => "parse",
            DriverError::Store(_) => "store",
            DriverError::Detection(_) => "detection",
            DriverError::Extraction { .. } => "extraction",
        }
    }
}
