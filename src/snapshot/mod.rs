//! Parquet lineage snapshots of normalized batches
//!
//! Each pipeline writes the batch it is about to load as a columnar file so a
//! run can be traced back to its input. Column types follow the declared
//! [`ColumnType`]s of the batch:
//!
//! | column type | Arrow type                         |
//! |-------------|------------------------------------|
//! | integer     | `Int64`                            |
//! | float       | `Float64`                          |
//! | text        | `Utf8`                             |
//! | date        | `Date32`                           |
//! | timestamp   | `Timestamp(Microsecond, None)`     |

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use tracing::{debug, info};

use crate::errors::SnapshotError;
use crate::models::{NormalizedRecordBatch, Record, Value, DATE_FORMAT};
use crate::schema::{ColumnSpec, ColumnType};

/// Schema metadata key carrying the schema name of the batch
pub const SCHEMA_NAME_KEY: &str = "starpipe.schema";

/// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub type SnapshotResult<T> = Result<T, SnapshotError>;

fn writer_properties() -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some(format!("starpipe {}", env!("CARGO_PKG_VERSION"))),
    };
    WriterProperties::builder()
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Integer => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Text => DataType::Utf8,
        ColumnType::Date => DataType::Date32,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
    }
}

fn arrow_schema(batch: &NormalizedRecordBatch) -> Arc<Schema> {
    let fields: Vec<Field> = batch
        .columns()
        .iter()
        .map(|c| Field::new(&c.name, arrow_type(c.column_type), true))
        .collect();
    let metadata = HashMap::from([(
        SCHEMA_NAME_KEY.to_string(),
        batch.schema_name().to_string(),
    )]);
    Arc::new(Schema::new(fields).with_metadata(metadata))
}

fn build_array(column: &ColumnSpec, records: &[Record]) -> ArrayRef {
    let cells = records
        .iter()
        .map(|r| r.get(&column.name).unwrap_or(&Value::Null));

    match column.column_type {
        ColumnType::Integer => Arc::new(Int64Array::from(
            cells
                .map(|v| match v {
                    Value::Integer(i) => Some(*i),
                    other => other.as_f64().map(|f| f as i64),
                })
                .collect::<Vec<_>>(),
        )),
        ColumnType::Float => Arc::new(Float64Array::from(
            cells.map(Value::as_f64).collect::<Vec<_>>(),
        )),
        ColumnType::Text => Arc::new(StringArray::from(
            cells
                .map(|v| (!v.is_null()).then(|| v.to_string()))
                .collect::<Vec<_>>(),
        )),
        ColumnType::Date => Arc::new(Date32Array::from(
            cells
                .map(|v| v.as_date().map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE))
                .collect::<Vec<_>>(),
        )),
        ColumnType::Timestamp => Arc::new(TimestampMicrosecondArray::from(
            cells
                .map(|v| match v {
                    Value::Timestamp(ts) => Some(ts.and_utc().timestamp_micros()),
                    Value::Date(d) => d.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc().timestamp_micros()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
    }
}

fn to_record_batch(batch: &NormalizedRecordBatch) -> SnapshotResult<RecordBatch> {
    let schema = arrow_schema(batch);
    let arrays: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|c| build_array(c, batch.records()))
        .collect();
    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Write `batch` to a single parquet file at `path`, creating parent directories
pub fn write_snapshot(path: &Path, batch: &NormalizedRecordBatch) -> SnapshotResult<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SnapshotError::io(parent, e))?;
    }

    let record_batch = to_record_batch(batch)?;
    let file = File::create(path).map_err(|e| SnapshotError::io(path, e))?;
    let mut writer = ArrowWriter::try_new(file, record_batch.schema(), Some(writer_properties()))?;
    writer.write(&record_batch)?;
    writer.close()?;

    info!(
        path = %path.display(),
        rows = batch.len(),
        schema = batch.schema_name(),
        "snapshot written"
    );
    Ok(path.to_path_buf())
}

/// Directory of one date partition: `<root>/date=YYYY-MM-DD`
pub fn partition_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(format!("date={}", date.format(DATE_FORMAT)))
}

/// Write `batch` into the date partition of `root` under `file_name`
///
/// Re-running for the same date overwrites that partition's file.
pub fn write_partitioned(
    root: &Path,
    date: NaiveDate,
    file_name: &str,
    batch: &NormalizedRecordBatch,
) -> SnapshotResult<PathBuf> {
    write_snapshot(&partition_dir(root, date).join(file_name), batch)
}

/// Every `file_name` below `date=*` partitions of `root`, in partition order
pub fn list_partitions(root: &Path, file_name: &str) -> SnapshotResult<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(root).map_err(|e| SnapshotError::io(root, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SnapshotError::io(root, e))?;
        let is_partition = entry
            .file_name()
            .to_str()
            .map_or(false, |name| name.starts_with("date="));
        let candidate = entry.path().join(file_name);
        if is_partition && candidate.is_file() {
            files.push(candidate);
        }
    }
    files.sort();
    Ok(files)
}

/// Read a snapshot back into records
pub fn read_snapshot(path: &Path) -> SnapshotResult<Vec<Record>> {
    let file = File::open(path).map_err(|e| SnapshotError::io(path, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let schema = batch.schema();
        let mut rows = vec![Record::new(); batch.num_rows()];
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            for (row, record) in rows.iter_mut().enumerate() {
                record.insert(field.name().clone(), read_cell(field.name(), column, row)?);
            }
        }
        records.extend(rows);
    }

    debug!(path = %path.display(), rows = records.len(), "snapshot read");
    Ok(records)
}

fn read_cell(name: &str, column: &ArrayRef, row: usize) -> SnapshotResult<Value> {
    if column.is_null(row) {
        return Ok(Value::Null);
    }
    let unsupported = || SnapshotError::UnsupportedType {
        column: name.to_string(),
        data_type: column.data_type().to_string(),
    };
    let any = column.as_any();

    let value = match column.data_type() {
        DataType::Int64 => Value::Integer(
            any.downcast_ref::<Int64Array>().ok_or_else(unsupported)?.value(row),
        ),
        DataType::Float64 => Value::Float(
            any.downcast_ref::<Float64Array>().ok_or_else(unsupported)?.value(row),
        ),
        DataType::Utf8 => Value::Text(
            any.downcast_ref::<StringArray>()
                .ok_or_else(unsupported)?
                .value(row)
                .to_string(),
        ),
        DataType::Date32 => {
            let days = any.downcast_ref::<Date32Array>().ok_or_else(unsupported)?.value(row);
            NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                .map(Value::Date)
                .ok_or_else(unsupported)?
        }
        DataType::Timestamp(TimeUnit::Microsecond, None) => {
            let micros = any
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(unsupported)?
                .value(row);
            chrono::DateTime::from_timestamp_micros(micros)
                .map(|ts| Value::Timestamp(ts.naive_utc()))
                .ok_or_else(unsupported)?
        }
        _ => return Err(unsupported()),
    };
    Ok(value)
}
