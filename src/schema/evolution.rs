//! Schema evolution for accumulated datasets: the column set of a dataset only
//! ever grows, and rows from older writes are padded with absent cells for
//! columns introduced later.

use std::collections::BTreeSet;

use super::types::{Cell, Table};

/// Sorted union of two column lists. Lexicographic on the column name, so
/// the on-disk order is the same no matter which write introduced a column.
pub fn union_columns(existing: &[String], incoming: &[String]) -> Vec<String> {
    existing
        .iter()
        .chain(incoming)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect()
}

/// Re-lay every row of `table` onto `columns`. Columns the table does not
/// have become `None`; nothing is synthesized and nothing is dropped as long
/// as `columns` is a superset of `table.columns`.
pub fn reindex(table: Table, columns: &[String]) -> Vec<Vec<Cell>> {
    let positions: Vec<Option<usize>> = columns.iter().map(|c| table.column_index(c)).collect();

    table
        .rows
        .into_iter()
        .map(|mut row| {
            positions
                .iter()
                .map(|pos| pos.and_then(|i| row.get_mut(i).and_then(Option::take)))
                .collect()
        })
        .collect()
}

/// Merge `incoming` into `existing`.
///
/// - no existing dataset: `incoming` is returned as is
/// - otherwise both sides are reindexed onto the sorted column union and the
///   incoming rows are appended after the existing ones, each side keeping its
///   own order
///
/// Rows are never deduplicated: merging the same table twice doubles it.
pub fn merge(existing: Option<Table>, incoming: Table) -> Table {
    let Some(existing) = existing else {
        return incoming;
    };

    let columns = union_columns(&existing.columns, &incoming.columns);
    let mut rows = Vec::with_capacity(existing.rows.len() + incoming.rows.len());
    rows.extend(reindex(existing, &columns));
    rows.extend(reindex(incoming, &columns));

    Table { columns, rows }
}

/// Columns of `merged` that `before` did not have, in `merged` order.
pub fn added_columns(before: &[String], merged: &Table) -> Vec<String> {
    merged
        .columns
        .iter()
        .filter(|c| !before.contains(c))
        .cloned()
        .collect()
}
