use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::errors::ConfigError;
use crate::runner::RetryPolicy;
use crate::transform::CoercionPolicy;
use crate::warehouse::is_valid_identifier;

pub mod defaults;
pub mod duration_serde;

pub use defaults::*;

/// Effective configuration, passed explicitly into every pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runner: RetryPolicy,
    pub transform: TransformConfig,
    pub sales: SalesConfig,
    pub rates: RatesConfig,
    pub transactions: TransactionsConfig,
    pub events: EventsConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

impl WarehouseConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub coercion: CoercionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SalesConfig {
    /// Folder scanned for `*.csv` files
    pub raw_dir: PathBuf,
    pub silver_dir: PathBuf,
    pub fact_table: String,
    pub max_retries: u32,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    pub api_url: String,
    pub base: String,
    pub symbols: Vec<String>,
    #[serde(with = "duration_serde::duration")]
    pub timeout: Duration,
    pub max_retries: u32,
    /// Read this payload instead of calling the API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rates_file: Option<PathBuf>,
    pub raw_dir: PathBuf,
    pub silver_dir: PathBuf,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionsConfig {
    pub transactions_file: PathBuf,
    pub rates_file: PathBuf,
    pub expected_base: String,
    /// Symbols accepted by the dimension value-set expectation
    pub allowed_symbols: Vec<String>,
    pub max_retries: u32,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub events_file: PathBuf,
    pub silver_dir: PathBuf,
    pub max_retries: u32,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub out_dir: PathBuf,
}

impl Default for SalesConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from(DEFAULT_SALES_RAW_DIR),
            silver_dir: PathBuf::from(DEFAULT_SALES_SILVER_DIR),
            fact_table: DEFAULT_SALES_FACT_TABLE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            warehouse: WarehouseConfig::new(DEFAULT_SALES_WAREHOUSE_URL),
        }
    }
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_RATES_API_URL.to_string(),
            base: DEFAULT_RATES_BASE.to_string(),
            symbols: DEFAULT_RATES_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            timeout: humantime::parse_duration(DEFAULT_RATES_TIMEOUT)
                .unwrap_or(Duration::from_secs(20)),
            max_retries: DEFAULT_RATES_MAX_RETRIES,
            rates_file: None,
            raw_dir: PathBuf::from(DEFAULT_RATES_RAW_DIR),
            silver_dir: PathBuf::from(DEFAULT_RATES_SILVER_DIR),
            warehouse: WarehouseConfig::new(DEFAULT_RATES_WAREHOUSE_URL),
        }
    }
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            transactions_file: PathBuf::from(DEFAULT_TRANSACTIONS_FILE),
            rates_file: PathBuf::from(DEFAULT_TRANSACTIONS_RATES_FILE),
            expected_base: DEFAULT_EXPECTED_BASE.to_string(),
            allowed_symbols: DEFAULT_ALLOWED_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            max_retries: DEFAULT_MAX_RETRIES,
            warehouse: WarehouseConfig::new(DEFAULT_TRANSACTIONS_WAREHOUSE_URL),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            events_file: PathBuf::from(DEFAULT_EVENTS_FILE),
            silver_dir: PathBuf::from(DEFAULT_EVENTS_SILVER_DIR),
            max_retries: DEFAULT_MAX_RETRIES,
            warehouse: WarehouseConfig::new(DEFAULT_EVENTS_WAREHOUSE_URL),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and `STARPIPE__*` environment variables
    ///
    /// An explicitly named file must exist; the default file is optional.
    /// `DATABASE_URL`, when set, points the sales pipeline at another warehouse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::build(path, true)?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                debug!("DATABASE_URL overrides sales warehouse url");
                config.sales.warehouse.url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file only, ignoring the environment
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::build(Some(path), false)?;
        config.validate()?;
        Ok(config)
    }

    fn build(path: Option<&Path>, with_env: bool) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut builder = config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(path.is_some()));

        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("rates.symbols")
                    .with_list_parse_key("transactions.allowed_symbols"),
            );
        }

        let config = builder.build()?.try_deserialize::<Config>()?;
        Ok(config)
    }

    /// Reject values no pipeline can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_identifier(&self.sales.fact_table) {
            return Err(ConfigError::invalid(
                "sales.fact_table",
                format!("'{}' is not a valid table name", self.sales.fact_table),
            ));
        }
        if self.rates.base.trim().is_empty() {
            return Err(ConfigError::invalid("rates.base", "must not be empty"));
        }
        if self.rates.symbols.is_empty() {
            return Err(ConfigError::invalid("rates.symbols", "at least one symbol is required"));
        }
        if self.transactions.expected_base.trim().is_empty() {
            return Err(ConfigError::invalid(
                "transactions.expected_base",
                "must not be empty",
            ));
        }
        if self.runner.jitter_percent > 100 {
            return Err(ConfigError::invalid(
                "runner.jitter_percent",
                "must be between 0 and 100",
            ));
        }

        for (field, warehouse) in [
            ("sales.warehouse", &self.sales.warehouse),
            ("rates.warehouse", &self.rates.warehouse),
            ("transactions.warehouse", &self.transactions.warehouse),
            ("events.warehouse", &self.events.warehouse),
        ] {
            if warehouse.url.trim().is_empty() {
                return Err(ConfigError::invalid(field, "url must not be empty"));
            }
            if warehouse.max_connections == 0 {
                return Err(ConfigError::invalid(field, "max_connections must be positive"));
            }
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn render(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runner.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.rates.max_retries, 3);
        assert_eq!(config.rates.timeout, Duration::from_secs(20));
        assert_eq!(config.transactions.expected_base, "EUR");
    }

    #[test]
    fn test_file_overrides_merge_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[runner]
max_retries = 4
retry_delay = "250ms"

[transform]
coercion = "strict"

[sales]
fact_table = "fact_orders"

[sales.warehouse]
url = "sqlite::memory:"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.runner.max_retries, 4);
        assert_eq!(config.runner.retry_delay, Duration::from_millis(250));
        assert_eq!(config.transform.coercion, CoercionPolicy::Strict);
        assert_eq!(config.sales.fact_table, "fact_orders");
        assert_eq!(config.sales.warehouse.url, "sqlite::memory:");
        assert_eq!(config.sales.warehouse.max_connections, DEFAULT_MAX_CONNECTIONS);
        // untouched sections keep their defaults
        assert_eq!(config.rates.base, "EUR");
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let mut config = Config::default();
        config.sales.fact_table = "fact; DROP TABLE x".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sales.fact_table"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(Config::from_file(&missing).is_err());
    }

    #[test]
    fn test_render_round_trips_through_toml() {
        let rendered = Config::default().render().unwrap();
        assert!(rendered.contains("[sales.warehouse]"));
        assert!(rendered.contains("retry_delay = \"5s\""));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.sales.fact_table, DEFAULT_SALES_FACT_TABLE);
    }
}
