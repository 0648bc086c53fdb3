//! Error type definitions for the pipeline stages
//!
//! Every failure is attributable to exactly one stage: extraction, transform,
//! load, snapshot, export or configuration. Stage errors are collected under
//! [`PipelineError`] so callers can report the stage and decide on exit codes.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while producing a raw batch from files or a network feed
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// File system failures (missing file, permission, interrupted read)
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Network failures talking to a remote feed
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Remote feed answered with a non-success status
    #[error("HTTP error: {status} from {url}")]
    Status { url: String, status: u16 },

    /// Input exists but cannot be decoded
    #[error("Parse error: {source_name} - {message}")]
    Parse { source_name: String, message: String },
}

/// Data-quality violations detected while normalizing a batch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaValidationError {
    /// A key column holds a null value
    #[error("null in required column: {column} (row {row})")]
    NullInKeyColumn { column: String, row: usize },

    /// Two records share the same key tuple
    #[error("duplicate key: ({columns}) = ({key})")]
    DuplicateKey { columns: String, key: String },

    /// A required column is absent from the batch
    #[error("missing required column: {column} in schema {schema}")]
    MissingColumn { schema: String, column: String },

    /// Strict coercion refused a value
    #[error("cannot coerce '{value}' to {target} in column {column}")]
    Coercion {
        column: String,
        value: String,
        target: String,
    },

    /// A reference payload lacks mandatory fields
    #[error("incomplete payload: {missing} missing")]
    IncompletePayload { missing: String },

    /// A reference payload is expressed against an unexpected base
    #[error("unexpected base currency: expected {expected}, got {actual}")]
    UnexpectedBase { expected: String, actual: String },
}

/// The rate table does not cover every currency present in the batch
#[derive(Error, Debug, Clone, PartialEq)]
#[error("missing rates for currencies: {missing:?}")]
pub struct RateCoverageError {
    pub missing: Vec<String>,
}

/// Errors produced by the transform stage
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error(transparent)]
    Schema(#[from] SchemaValidationError),

    #[error(transparent)]
    RateCoverage(#[from] RateCoverageError),
}

/// Warehouse access failures
#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Underlying SQL failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A table or column name that cannot be safely quoted
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A table expected by a reader does not exist
    #[error("Table not found: {0}")]
    MissingTable(String),

    /// The warehouse location could not be prepared
    #[error("Cannot prepare warehouse at {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the dimensional load; nothing is committed when one occurs
#[derive(Error, Debug)]
pub enum LoadError {
    /// A fact row references a natural key absent from its dimension
    #[error("unresolved foreign key: {dimension} = {natural_key:?} (fact row {row})")]
    UnresolvedForeignKey {
        dimension: String,
        natural_key: Option<String>,
        row: usize,
    },

    /// Star schema declaration is inconsistent
    #[error("invalid star schema: {0}")]
    InvalidStar(String),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

impl From<sqlx::Error> for LoadError {
    fn from(error: sqlx::Error) -> Self {
        LoadError::Warehouse(WarehouseError::Database(error))
    }
}

/// Parquet snapshot failures
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Snapshot column {column} has unsupported type {data_type}")]
    UnsupportedType { column: String, data_type: String },
}

/// CSV report export failures
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Configuration loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },

    #[error("Cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Top-level error of a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<SchemaValidationError> for PipelineError {
    fn from(error: SchemaValidationError) -> Self {
        PipelineError::Transform(TransformError::Schema(error))
    }
}

impl From<RateCoverageError> for PipelineError {
    fn from(error: RateCoverageError) -> Self {
        PipelineError::Transform(TransformError::RateCoverage(error))
    }
}

impl From<WarehouseError> for PipelineError {
    fn from(error: WarehouseError) -> Self {
        PipelineError::Load(LoadError::Warehouse(error))
    }
}

impl ExtractionError {
    /// Create an I/O error for a path
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error for a named input
    pub fn parse<S: Into<String>, M: Into<String>>(source_name: S, message: M) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed
    ///
    /// Network and file system failures are transient. Decoding failures and
    /// client-side HTTP statuses are not: the same input fails the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractionError::Io { .. } => true,
            ExtractionError::Http { .. } => true,
            ExtractionError::Status { status, .. } => *status >= 500 || *status == 429,
            ExtractionError::Parse { .. } => false,
        }
    }
}

impl SnapshotError {
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl ExportError {
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl ConfigError {
    pub fn invalid<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl PipelineError {
    /// Name of the stage the failure belongs to
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Extraction(_) => "extract",
            PipelineError::Transform(_) => "transform",
            PipelineError::Load(_) => "load",
            PipelineError::Snapshot(_) => "snapshot",
            PipelineError::Export(_) => "export",
            PipelineError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_transient_classification() {
        let io = ExtractionError::io(
            "data/raw.csv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(io.is_transient());

        let parse = ExtractionError::parse("rates.json", "expected object");
        assert!(!parse.is_transient());

        let server = ExtractionError::Status {
            url: "http://feed".to_string(),
            status: 503,
        };
        assert!(server.is_transient());

        let client = ExtractionError::Status {
            url: "http://feed".to_string(),
            status: 404,
        };
        assert!(!client.is_transient());
    }

    #[test]
    fn test_schema_error_messages() {
        let null = SchemaValidationError::NullInKeyColumn {
            column: "order_id".to_string(),
            row: 3,
        };
        assert!(null.to_string().starts_with("null in required column"));

        let dup = SchemaValidationError::DuplicateKey {
            columns: "order_id, product_id".to_string(),
            key: "1, P1".to_string(),
        };
        assert!(dup.to_string().starts_with("duplicate key"));
    }

    #[test]
    fn test_rate_coverage_message_lists_currencies() {
        let err = RateCoverageError {
            missing: vec!["XXX".to_string()],
        };
        assert_eq!(err.to_string(), "missing rates for currencies: [\"XXX\"]");
    }

    #[test]
    fn test_pipeline_error_stage_attribution() {
        let err: PipelineError = RateCoverageError { missing: vec![] }.into();
        assert_eq!(err.stage(), "transform");

        let err: PipelineError = LoadError::InvalidStar("no dimensions".to_string()).into();
        assert_eq!(err.stage(), "load");

        let err: PipelineError = ExtractionError::parse("x", "y").into();
        assert_eq!(err.stage(), "extract");
    }
}
