//! JSON array log files

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::Extractor;
use crate::errors::ExtractionError;
use crate::models::{RawRecordBatch, Record, Value};

/// A file holding a JSON array of flat objects
#[derive(Debug, Clone)]
pub struct JsonFileExtractor {
    path: PathBuf,
    label: String,
}

impl JsonFileExtractor {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self { path, label }
    }
}

#[async_trait]
impl Extractor for JsonFileExtractor {
    fn name(&self) -> &str {
        &self.label
    }

    async fn extract(&self) -> Result<RawRecordBatch, ExtractionError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ExtractionError::io(&self.path, e))?;
        let items: Vec<serde_json::Value> = serde_json::from_str(&content)
            .map_err(|e| ExtractionError::parse(self.label.clone(), e.to_string()))?;

        let mut records = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let serde_json::Value::Object(fields) = item else {
                return Err(ExtractionError::parse(
                    self.label.clone(),
                    format!("element {index} is not an object"),
                ));
            };
            let record: Record = fields
                .into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect();
            records.push(record);
        }

        info!(source = %self.label, rows = records.len(), "extracted json file");
        Ok(RawRecordBatch::new(self.label.clone(), records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_array_of_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(
            &path,
            r#"[{"user_id": 1, "event": "login", "timestamp": "2025-08-13T09:00:00Z"},
               {"user_id": 2, "event": "purchase", "timestamp": null}]"#,
        )
        .unwrap();

        let batch = JsonFileExtractor::new(&path).extract().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records[0]["user_id"], Value::Integer(1));
        assert_eq!(batch.records[1]["timestamp"], Value::Null);
    }

    #[tokio::test]
    async fn test_non_array_is_permanent_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(&path, r#"{"user_id": 1}"#).unwrap();

        let err = JsonFileExtractor::new(&path).extract().await.unwrap_err();
        assert!(matches!(err, ExtractionError::Parse { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_scalar_element_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        let err = JsonFileExtractor::new(&path).extract().await.unwrap_err();
        assert!(err.to_string().contains("element 0 is not an object"));
    }
}
