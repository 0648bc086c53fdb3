//! Exchange-rate sources: the HTTP feed and stored JSON payloads

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::RatesSource;
use crate::errors::ExtractionError;
use crate::models::RatesPayload;

/// Client for a `GET {api_url}/latest?base=..&symbols=..` rates feed
#[derive(Debug, Clone)]
pub struct RatesApiClient {
    client: Client,
    api_url: String,
    base: String,
    symbols: Vec<String>,
}

impl RatesApiClient {
    pub fn new(api_url: &str, base: &str, symbols: &[String], timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("starpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            base: base.to_string(),
            symbols: symbols.to_vec(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/latest", self.api_url)
    }
}

#[async_trait]
impl RatesSource for RatesApiClient {
    fn name(&self) -> &str {
        &self.api_url
    }

    async fn fetch(&self) -> Result<RatesPayload, ExtractionError> {
        let url = self.endpoint();
        let symbols = self.symbols.join(",");
        debug!(url = %url, base = %self.base, symbols = %symbols, "requesting rates");

        let response = self
            .client
            .get(&url)
            .query(&[("base", self.base.as_str()), ("symbols", symbols.as_str())])
            .send()
            .await
            .map_err(|source| ExtractionError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| ExtractionError::Http {
                url: url.clone(),
                source,
            })?;
        let payload: RatesPayload = serde_json::from_str(&body)
            .map_err(|e| ExtractionError::parse(url.clone(), e.to_string()))?;

        info!(url = %url, rates = payload.rates.len(), "fetched rates");
        Ok(payload)
    }
}

/// A rates payload stored as a JSON file
#[derive(Debug, Clone)]
pub struct RatesFileReader {
    path: PathBuf,
    label: String,
}

impl RatesFileReader {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self { path, label }
    }
}

#[async_trait]
impl RatesSource for RatesFileReader {
    fn name(&self) -> &str {
        &self.label
    }

    async fn fetch(&self) -> Result<RatesPayload, ExtractionError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ExtractionError::io(&self.path, e))?;
        let payload: RatesPayload = serde_json::from_str(&content)
            .map_err(|e| ExtractionError::parse(self.label.clone(), e.to_string()))?;
        debug!(source = %self.label, rates = payload.rates.len(), "read rates file");
        Ok(payload)
    }
}
