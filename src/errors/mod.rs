//! Centralized error handling for the pipelines
//!
//! # Error Categories
//!
//! - **Extraction Errors**: file and network failures, the only retryable class
//! - **Schema Validation Errors**: null or duplicate keys, missing columns, strict coercion
//! - **Rate Coverage Errors**: reference rates that do not cover the batch
//! - **Load Errors**: referential integrity and storage failures, never partially committed
//! - **Snapshot / Export Errors**: lineage and report plumbing
//!
//! Expectation failures found by the validation gate are not errors: they are
//! reported in [`crate::validation::GateReport`].

pub mod types;

pub use types::*;

/// Convenience type alias for Results using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Convenience type alias for warehouse access
pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// Convenience type alias for load operations
pub type LoadResult<T> = Result<T, LoadError>;
