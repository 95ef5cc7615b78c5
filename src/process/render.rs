use csv::{Terminator, WriterBuilder};
use std::io;

use crate::schema::Table;

/// Serialize a table to the persisted CSV form: header first, `\n` line
/// endings, absent cells as empty fields. Cells containing the separator,
/// quotes or newlines are quoted.
pub fn render_table(table: &Table) -> Result<String, csv::Error> {
    let mut wtr = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    wtr.write_record(&table.columns)?;
    for row in &table.rows {
        wtr.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| csv::Error::from(io::Error::new(io::ErrorKind::InvalidData, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::parse_dataset;

    #[test]
    fn renders_absent_cells_as_empty_fields() {
        let table = Table::new(vec!["a".into(), "b".into(), "c".into()])
            .with_row([Some("1"), None, Some("3")])
            .with_row([None, Some("x"), None::<&str>]);
        assert_eq!(render_table(&table).unwrap(), "a,b,c\n1,,3\n,x,\n");
    }

    #[test]
    fn separator_inside_a_cell_survives_reload() {
        let table = Table::new(vec!["input_reference".into(), "value".into()])
            .with_row([Some("p. 2, line 4"), Some("7")]);
        let text = render_table(&table).unwrap();
        assert_eq!(text, "input_reference,value\n\"p. 2, line 4\",7\n");
        assert_eq!(parse_dataset(&text).unwrap(), table);
    }
}
