pub mod config;
pub mod errors;
pub mod export;
pub mod ingestor;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod runner;
pub mod schema;
pub mod snapshot;
pub mod transform;
pub mod validation;
pub mod warehouse;
