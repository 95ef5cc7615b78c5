// src/export.rs
//! Parquet snapshots of accumulated datasets.

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Float64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use chrono::Utc;
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::Builder;
use tracing::info;

use crate::schema::Table;
use crate::store::DatasetStore;

/// Float64 when every present cell parses as a number (and at least one is
/// present), Utf8 otherwise.
pub fn infer_column_type(cells: &[Option<&str>]) -> DataType {
    let mut present = cells.iter().flatten().peekable();
    if present.peek().is_none() {
        return DataType::Utf8;
    }
    if present.all(|v| v.parse::<f64>().is_ok()) {
        DataType::Float64
    } else {
        DataType::Utf8
    }
}

/// Convert a table into a single Arrow batch; every column is nullable.
pub fn to_record_batch(table: &Table) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns.len());

    for (idx, name) in table.columns.iter().enumerate() {
        let cells: Vec<Option<&str>> = table
            .rows
            .iter()
            .map(|r| r.get(idx).and_then(|c| c.as_deref()))
            .collect();

        let ty = infer_column_type(&cells);
        let array: ArrayRef = match ty {
            DataType::Float64 => Arc::new(
                cells
                    .iter()
                    .map(|c| c.and_then(|v| v.parse::<f64>().ok()))
                    .collect::<Float64Array>(),
            ),
            _ => Arc::new(cells.iter().copied().collect::<StringArray>()),
        };
        fields.push(Field::new(name, ty, true));
        arrays.push(array);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .context("building record batch from dataset")
}

/// Write the dataset for `key` to `<out_dir>/<key>---<utc timestamp>.parquet`.
/// Returns `None` when no dataset exists for `key`.
pub fn export_parquet(store: &DatasetStore, key: &str, out_dir: &Path) -> Result<Option<PathBuf>> {
    let Some(table) = store
        .load(key)
        .with_context(|| format!("loading dataset `{}`", key))?
    else {
        return Ok(None);
    };

    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating export directory {}", out_dir.display()))?;

    let batch = to_record_batch(&table)?;
    let ts = Utc::now().format("%Y%m%dT%H%M%S%6f");
    let final_path = out_dir.join(format!("{}---{}.parquet", key, ts));

    let mut tmp = Builder::new()
        .prefix(&format!(".{}.", key))
        .suffix(".parquet.tmp")
        .tempfile_in(out_dir)
        .with_context(|| format!("creating temporary file in {}", out_dir.display()))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(
        BufWriter::new(tmp.as_file_mut()),
        batch.schema(),
        Some(props),
    )
    .context("creating ArrowWriter for export")?;
    writer.write(&batch).context("writing export batch")?;
    writer
        .into_inner()
        .context("closing ArrowWriter for export")?
        .flush()
        .context("flushing export file")?;

    tmp.persist(&final_path)
        .with_context(|| format!("renaming export to {}", final_path.display()))?;

    info!(
        key,
        rows = batch.num_rows(),
        path = %final_path.display(),
        "exported dataset"
    );
    Ok(Some(final_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn numeric_columns_become_floats() {
        assert_eq!(
            infer_column_type(&[Some("1"), None, Some("2.5")]),
            DataType::Float64
        );
        assert_eq!(infer_column_type(&[Some("1"), Some("n/a")]), DataType::Utf8);
        assert_eq!(infer_column_type(&[None, None]), DataType::Utf8);
    }

    #[test]
    fn record_batch_keeps_nulls() {
        let table = Table::new(vec!["date".into(), "value".into()])
            .with_row([Some("2024"), Some("3.5")])
            .with_row([None, Some("4")]);

        let batch = to_record_batch(&table).unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Float64);
        let dates = batch
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert!(dates.is_null(1));
        let values = batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(values.value(0), 3.5);
    }

    #[test]
    fn export_writes_readable_parquet() -> Result<()> {
        let tmp = tempdir()?;
        let store = DatasetStore::open(tmp.path().join("datasets"))?;
        store.write(
            "economy",
            Table::new(vec!["country".into(), "gdp".into()])
                .with_row([Some("FR"), Some("2.9")])
                .with_row([Some("DE"), None]),
        )?;

        let out = tmp.path().join("exports");
        let path = export_parquet(&store, "economy", &out)?.expect("dataset exists");
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("economy---"));

        let mut reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?.build()?;
        let batch = reader.next().transpose()?.expect("one batch");
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(0).name(), "country");
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Float64);

        // only the final file remains
        assert_eq!(fs::read_dir(&out)?.count(), 1);
        Ok(())
    }

    #[test]
    fn missing_dataset_exports_nothing() -> Result<()> {
        let tmp = tempdir()?;
        let store = DatasetStore::open(tmp.path())?;
        assert!(export_parquet(&store, "nothing", &tmp.path().join("out"))?.is_none());
        Ok(())
    }
}
