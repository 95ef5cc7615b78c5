// src/schema/types.rs

use serde::Serialize;

/// Column every producer attaches to its rows, pointing back at the source
/// text fragment the row was extracted from.
pub const PROVENANCE_COLUMN: &str = "input_reference";

/// Field separator of the persisted CSV form.
pub const FIELD_SEPARATOR: char = ',';

/// A single cell: present text (which may be numeric) or absent.
pub type Cell = Option<String>;

/// An in-memory table: unique column names plus rows aligned positionally
/// with `columns`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builder-style helper, mostly for tests and scripted producers.
    pub fn with_row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.rows
            .push(cells.into_iter().map(|c| c.map(Into::into)).collect());
        self
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` under column `name`; `None` for absent cells and unknown columns.
    pub fn get(&self, row: usize, name: &str) -> Option<&str> {
        let idx = self.column_index(name)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    /// All cells of column `name`, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.get(idx).and_then(|c| c.as_deref()))
                .collect(),
        )
    }

    /// Row indices whose provenance cell contains the field separator.
    /// Producers are expected to substitute it; the writer still quotes such
    /// cells so they survive a round trip.
    pub fn provenance_violations(&self) -> Vec<usize> {
        let Some(idx) = self.column_index(PROVENANCE_COLUMN) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.get(idx)
                    .and_then(|c| c.as_deref())
                    .is_some_and(|v| v.contains(FIELD_SEPARATOR))
            })
            .map(|(i, _)| i)
            .collect()
    }
}
