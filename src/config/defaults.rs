/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Configuration file
pub const DEFAULT_CONFIG_FILE: &str = "starpipe.toml";
pub const ENV_PREFIX: &str = "STARPIPE";
pub const ENV_SEPARATOR: &str = "__";

// Warehouse defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_SALES_WAREHOUSE_URL: &str = "sqlite://./data/warehouse/sales.db";
pub const DEFAULT_RATES_WAREHOUSE_URL: &str = "sqlite://./data/warehouse/rates.db";
pub const DEFAULT_TRANSACTIONS_WAREHOUSE_URL: &str = "sqlite://./data/warehouse/transactions.db";
pub const DEFAULT_EVENTS_WAREHOUSE_URL: &str = "sqlite://./data/warehouse/events.db";

// Runner defaults
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY: &str = "5s";
pub const DEFAULT_JITTER_PERCENT: u8 = 0;

// Sales pipeline defaults
pub const DEFAULT_SALES_RAW_DIR: &str = "./data/raw";
pub const DEFAULT_SALES_SILVER_DIR: &str = "./data/silver";
pub const DEFAULT_SALES_FACT_TABLE: &str = "fact_sales";

// Rates pipeline defaults
pub const DEFAULT_RATES_API_URL: &str = "https://api.exchangerate.host";
pub const DEFAULT_RATES_BASE: &str = "EUR";
pub const DEFAULT_RATES_SYMBOLS: &[&str] = &["USD", "GBP", "PLN", "UAH", "BRL", "JPY"];
pub const DEFAULT_RATES_TIMEOUT: &str = "20s";
pub const DEFAULT_RATES_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RATES_RAW_DIR: &str = "./data/rates/raw";
pub const DEFAULT_RATES_SILVER_DIR: &str = "./data/rates/silver";

// Transactions pipeline defaults
pub const DEFAULT_TRANSACTIONS_FILE: &str = "./data/transactions.csv";
pub const DEFAULT_TRANSACTIONS_RATES_FILE: &str = "./data/rates.json";
pub const DEFAULT_EXPECTED_BASE: &str = "EUR";
pub const DEFAULT_ALLOWED_SYMBOLS: &[&str] =
    &["EUR", "USD", "GBP", "UAH", "JPY", "PLN", "CHF", "BRL"];

// Events pipeline defaults
pub const DEFAULT_EVENTS_FILE: &str = "./data/events.json";
pub const DEFAULT_EVENTS_SILVER_DIR: &str = "./data/events/silver";

// Export defaults
pub const DEFAULT_EXPORT_DIR: &str = "./data/export";

// Transform defaults
pub const DEFAULT_AMOUNT_PRECISION: u32 = 2;
