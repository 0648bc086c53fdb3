//! Extractors: the collaborators that produce raw batches
//!
//! Extraction is the only stage whose failures may be transient, so every
//! extractor reports [`ExtractionError`] and is retried by the task runner.

use async_trait::async_trait;

use crate::errors::ExtractionError;
use crate::models::{RatesPayload, RawRecordBatch};

pub mod csv_file;
pub mod json_file;
pub mod rates;

pub use csv_file::{CsvFileExtractor, CsvFolderExtractor};
pub use json_file::JsonFileExtractor;
pub use rates::{RatesApiClient, RatesFileReader};

/// Produces one raw batch per call
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Label used in logs and batch attribution
    fn name(&self) -> &str;

    async fn extract(&self) -> Result<RawRecordBatch, ExtractionError>;
}

/// Produces an exchange-rate payload
#[async_trait]
pub trait RatesSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<RatesPayload, ExtractionError>;
}
