//! Rates: daily exchange-rate snapshots loaded as a currency star
//!
//! Each run stores the raw payload and one date partition, then reloads the
//! whole partition history so the warehouse always mirrors the lake.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::info;

use super::{PipelineEngine, PipelineKind, RunSummary};
use crate::config::Config;
use crate::errors::{PipelineResult, SnapshotError};
use crate::export::ReportQuery;
use crate::ingestor::{RatesApiClient, RatesFileReader, RatesSource};
use crate::loader::DimensionalLoader;
use crate::models::{RatesPayload, RawRecordBatch, DATE_FORMAT};
use crate::schema::{ColumnSpec, DimensionSpec, FactSpec, SchemaSpec, StarSchema};
use crate::snapshot::{list_partitions, read_snapshot, write_partitioned};
use crate::transform::RateTable;
use crate::validation::{Expectation, ExpectationSuite, RangeBound};
use crate::warehouse::Warehouse;

pub const PARTITION_FILE: &str = "rates.parquet";

pub fn schema() -> SchemaSpec {
    SchemaSpec::new("rates")
        .column(ColumnSpec::date("date").required())
        .column(ColumnSpec::text("base").uppercase())
        .column(ColumnSpec::text("symbol").required().uppercase())
        .column(ColumnSpec::float("rate"))
        .key_columns(&["symbol"])
        .unique_with(&["date"])
        .sort_by("symbol")
}

pub fn star() -> StarSchema {
    StarSchema::new(
        FactSpec::new("fact_rates")
            .references("currency")
            .column(ColumnSpec::text("base"))
            .measure("rate")
            .dated("date"),
    )
    .dimension(DimensionSpec::new("currency", "dim_currency", "currency_key", "symbol"))
}

pub fn suites() -> Vec<ExpectationSuite> {
    vec![
        ExpectationSuite::new("dim_currency")
            .expect(Expectation::not_null("symbol"))
            .expect(Expectation::unique("symbol"))
            .expect(Expectation::matches("symbol", "^[A-Z]{3}$")),
        ExpectationSuite::new("fact_rates")
            .expect(Expectation::not_null("rate"))
            .expect(Expectation::greater_than("rate", RangeBound::Number(0.0)))
            .expect(Expectation::not_null("date"))
            .expect(Expectation::references("currency_key", "dim_currency", "currency_key")),
    ]
}

pub fn reports() -> PipelineResult<Vec<ReportQuery>> {
    Ok(vec![
        ReportQuery::table("dim_currency", &["symbol"])?,
        ReportQuery::new(
            "rates_history",
            "SELECT f.date, f.base, d.symbol, f.rate \
             FROM fact_rates f JOIN dim_currency d ON d.currency_key = f.currency_key \
             ORDER BY f.date, d.symbol",
        ),
    ])
}

/// Store the payload as fetched under `raw/<run_date>.json`
fn save_raw(raw_dir: &Path, run_date: NaiveDate, payload: &RatesPayload) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(raw_dir).map_err(|e| SnapshotError::io(raw_dir, e))?;
    let path = raw_dir.join(format!("{}.json", run_date.format(DATE_FORMAT)));
    let body = serde_json::to_string_pretty(payload)
        .map_err(|e| SnapshotError::io(&path, std::io::Error::other(e)))?;
    std::fs::write(&path, body).map_err(|e| SnapshotError::io(&path, e))?;
    Ok(path)
}

fn read_history(silver_dir: &Path) -> Result<RawRecordBatch, SnapshotError> {
    let mut history = RawRecordBatch::new(silver_dir.display().to_string(), Vec::new());
    for partition in list_partitions(silver_dir, PARTITION_FILE)? {
        let records = read_snapshot(&partition)?;
        history.extend(RawRecordBatch::new(partition.display().to_string(), records));
    }
    Ok(history)
}

pub async fn run(config: &Config, warehouse: &Warehouse) -> PipelineResult<RunSummary> {
    run_for_date(config, warehouse, Utc::now().date_naive()).await
}

/// Run with an explicit run date, which stamps the payload and names its partition
pub async fn run_for_date(
    config: &Config,
    warehouse: &Warehouse,
    run_date: NaiveDate,
) -> PipelineResult<RunSummary> {
    let rates = &config.rates;
    let engine = PipelineEngine::new(PipelineKind::Rates, config, rates.max_retries);

    let source: Box<dyn RatesSource> = match &rates.rates_file {
        Some(path) => Box::new(RatesFileReader::new(path)),
        None => Box::new(RatesApiClient::new(
            &rates.api_url,
            &rates.base,
            &rates.symbols,
            rates.timeout,
        )),
    };
    let mut payload = engine.fetch_rates(source.as_ref()).await?;
    payload.run_date = Some(run_date.format(DATE_FORMAT).to_string());

    let raw_path = engine
        .snapshot(|| save_raw(&rates.raw_dir, run_date, &payload))
        .await?;
    info!(path = %raw_path.display(), "raw rates saved");

    let daily = engine
        .stage("transform", || {
            let table = RateTable::from_payload(&payload, Some(rates.base.as_str()), true)?;
            Ok(engine
                .transformer()
                .transform(&table.to_raw_batch(source.name()), &schema())?)
        })
        .await?;
    let partition = engine
        .snapshot(|| write_partitioned(&rates.silver_dir, run_date, PARTITION_FILE, &daily))
        .await?;

    let history = engine
        .stage("snapshot", || Ok(read_history(&rates.silver_dir)?))
        .await?;
    let batch = engine.transform(&history, &schema()).await?;

    let loader = DimensionalLoader::new(star())?;
    let counts = engine.load(&loader, &batch, warehouse).await?;
    Ok(engine.finish(daily.len(), Some(partition), counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;
    use crate::models::Value;

    fn config(dir: &Path, rates_json: &str) -> Config {
        let rates_file = dir.join("rates.json");
        std::fs::write(&rates_file, rates_json).unwrap();

        let mut config = Config::default();
        config.rates.rates_file = Some(rates_file);
        config.rates.raw_dir = dir.join("raw");
        config.rates.silver_dir = dir.join("silver");
        config.rates.warehouse =
            WarehouseConfig::new(format!("sqlite://{}", dir.join("rates.db").display()));
        config.runner.retry_delay = std::time::Duration::from_millis(1);
        config
    }

    #[tokio::test]
    async fn test_history_accumulates_across_run_dates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            dir.path(),
            r#"{"base": "EUR", "rates": {"USD": 1.1, "GBP": 0.86}}"#,
        );
        let warehouse = Warehouse::connect(&config.rates.warehouse).await.unwrap();
        let day_one = NaiveDate::from_ymd_opt(2025, 8, 12).unwrap();
        let day_two = NaiveDate::from_ymd_opt(2025, 8, 13).unwrap();

        run_for_date(&config, &warehouse, day_one).await.unwrap();
        let summary = run_for_date(&config, &warehouse, day_two).await.unwrap();
        // same day again replaces its partition
        let again = run_for_date(&config, &warehouse, day_two).await.unwrap();

        assert!(summary
            .snapshot
            .unwrap()
            .ends_with("date=2025-08-13/rates.parquet"));
        let counts = again.counts.unwrap();
        assert_eq!(counts.fact_count, 4);
        assert_eq!(counts.dim_count, 2);
        assert!(dir.path().join("raw").join("2025-08-12.json").exists());

        let dim = warehouse.read_table("dim_currency").await.unwrap();
        assert_eq!(
            dim.column("symbol").unwrap(),
            vec![&Value::from("GBP"), &Value::from("USD")]
        );
    }

    #[tokio::test]
    async fn test_incomplete_payload_fails_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), r#"{"rates": {"USD": 1.1}}"#);
        let warehouse = Warehouse::connect(&config.rates.warehouse).await.unwrap();

        let err = run_for_date(&config, &warehouse, NaiveDate::from_ymd_opt(2025, 8, 13).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "transform");
        assert!(err.to_string().contains("base"));
        assert!(list_partitions(&config.rates.silver_dir, PARTITION_FILE)
            .unwrap()
            .is_empty());
        assert!(!warehouse.table_exists("fact_rates").await.unwrap());
    }
}
