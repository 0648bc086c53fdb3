//! Delimited-file extractors

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Extractor;
use crate::errors::ExtractionError;
use crate::models::{RawRecordBatch, Record, Value};

/// Read one CSV file with a header row; every cell is text
fn read_csv(path: &Path) -> Result<Vec<Record>, ExtractionError> {
    let file = std::fs::File::open(path).map_err(|e| ExtractionError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| csv_error(path, e))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| csv_error(path, e))?;
        let record: Record = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let cell = row.get(i).map_or(Value::Null, Value::from);
                (header.to_string(), cell)
            })
            .collect();
        records.push(record);
    }

    debug!(path = %path.display(), rows = records.len(), "csv file read");
    Ok(records)
}

fn csv_error(path: &Path, error: csv::Error) -> ExtractionError {
    if !error.is_io_error() {
        return ExtractionError::parse(path.display().to_string(), error.to_string());
    }
    match error.into_kind() {
        csv::ErrorKind::Io(io) => ExtractionError::io(path, io),
        other => ExtractionError::parse(path.display().to_string(), format!("{other:?}")),
    }
}

/// Run blocking file reads on the blocking pool
async fn read_blocking<T, F>(path: &Path, read: F) -> Result<T, ExtractionError>
where
    F: FnOnce() -> Result<T, ExtractionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(read).await.map_err(|e| {
        ExtractionError::parse(path.display().to_string(), format!("reader task failed: {e}"))
    })?
}

/// CSV files of `dir` sorted by name
fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ExtractionError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ExtractionError::io(dir, e))?.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// A single CSV file
#[derive(Debug, Clone)]
pub struct CsvFileExtractor {
    path: PathBuf,
    label: String,
}

impl CsvFileExtractor {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self { path, label }
    }
}

#[async_trait]
impl Extractor for CsvFileExtractor {
    fn name(&self) -> &str {
        &self.label
    }

    async fn extract(&self) -> Result<RawRecordBatch, ExtractionError> {
        let path = self.path.clone();
        let records = read_blocking(&self.path, move || read_csv(&path)).await?;
        info!(source = %self.label, rows = records.len(), "extracted csv file");
        Ok(RawRecordBatch::new(self.label.clone(), records))
    }
}

/// Every `*.csv` file of a folder, in file-name order, concatenated
///
/// A folder without CSV files yields an empty batch.
#[derive(Debug, Clone)]
pub struct CsvFolderExtractor {
    dir: PathBuf,
    label: String,
}

impl CsvFolderExtractor {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        let label = dir.display().to_string();
        Self { dir, label }
    }

    /// CSV files of the folder sorted by name
    pub fn files(&self) -> Result<Vec<PathBuf>, ExtractionError> {
        list_csv_files(&self.dir)
    }
}

#[async_trait]
impl Extractor for CsvFolderExtractor {
    fn name(&self) -> &str {
        &self.label
    }

    async fn extract(&self) -> Result<RawRecordBatch, ExtractionError> {
        let dir = self.dir.clone();
        let (files, records) = read_blocking(&self.dir, move || {
            let files = list_csv_files(&dir)?;
            let mut records = Vec::new();
            for file in &files {
                records.extend(read_csv(file)?);
            }
            Ok((files, records))
        })
        .await?;

        if files.is_empty() {
            warn!(dir = %self.label, "no CSV files found");
        } else {
            info!(
                dir = %self.label,
                files = files.len(),
                rows = records.len(),
                "extracted csv folder"
            );
        }
        Ok(RawRecordBatch::new(self.label.clone(), records))
    }
}
