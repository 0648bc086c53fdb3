//! Transactions: multi-currency payments converted into the base currency

use chrono::Utc;

use super::{PipelineEngine, PipelineKind, RunSummary};
use crate::config::Config;
use crate::errors::PipelineResult;
use crate::export::ReportQuery;
use crate::ingestor::{CsvFileExtractor, RatesFileReader};
use crate::loader::DimensionalLoader;
use crate::models::ValueType;
use crate::schema::{ColumnSpec, DimensionSpec, FactSpec, SchemaSpec, StarSchema};
use crate::transform::{CurrencyConversion, RateTable};
use crate::validation::{Expectation, ExpectationSuite, RangeBound};
use crate::warehouse::Warehouse;

pub fn schema() -> SchemaSpec {
    SchemaSpec::new("transactions")
        .column(ColumnSpec::integer("user_id").required())
        .column(ColumnSpec::float("amount").required())
        .column(ColumnSpec::text("currency").required().uppercase())
        .column(ColumnSpec::date("date"))
}

pub fn star() -> StarSchema {
    StarSchema::new(
        FactSpec::new("fact_transactions")
            .references("currency")
            .column(ColumnSpec::integer("user_id"))
            .measure("amount_eur")
            .dated("date"),
    )
    .dimension(
        DimensionSpec::new("currency", "dim_currency", "currency_key", "symbol")
            .from_column("currency")
            .attribute(ColumnSpec::float("rate_to_eur")),
    )
}

pub fn suites(config: &Config) -> Vec<ExpectationSuite> {
    let today = Utc::now().date_naive();
    vec![
        ExpectationSuite::new("fact_transactions")
            .expect(Expectation::not_null("user_id"))
            .expect(Expectation::not_null("amount_eur"))
            .expect(Expectation::not_null("date"))
            .expect(Expectation::type_membership("user_id", &[ValueType::Integer]))
            .expect(Expectation::at_least("amount_eur", RangeBound::Number(0.0)))
            .expect(Expectation::at_most("date", RangeBound::Date(today)))
            .expect(Expectation::references("currency_key", "dim_currency", "currency_key")),
        ExpectationSuite::new("dim_currency")
            .expect(Expectation::not_null("symbol"))
            .expect(Expectation::not_null("rate_to_eur"))
            .expect(Expectation::greater_than("rate_to_eur", RangeBound::Number(0.0)))
            .expect(Expectation::value_set("symbol", &config.transactions.allowed_symbols))
            .expect(Expectation::unique("symbol")),
    ]
}

pub fn reports() -> PipelineResult<Vec<ReportQuery>> {
    Ok(vec![
        ReportQuery::table("fact_transactions", &["user_id", "amount_eur", "date"])?,
        ReportQuery::table("dim_currency", &["symbol", "rate_to_eur"])?,
        ReportQuery::new(
            "daily_revenue",
            "SELECT date, ROUND(SUM(amount_eur), 2) AS revenue_eur \
             FROM fact_transactions GROUP BY date ORDER BY date",
        ),
    ])
}

pub async fn run(config: &Config, warehouse: &Warehouse) -> PipelineResult<RunSummary> {
    let settings = &config.transactions;
    let engine = PipelineEngine::new(PipelineKind::Transactions, config, settings.max_retries);

    let raw = engine
        .extract(&CsvFileExtractor::new(&settings.transactions_file))
        .await?;
    let mut payload = engine
        .fetch_rates(&RatesFileReader::new(&settings.rates_file))
        .await?;
    // payloads without a base are expressed against the expected one
    if payload.base.as_deref().map_or(true, |b| b.trim().is_empty()) {
        payload.base = Some(settings.expected_base.clone());
    }

    let rates = engine
        .stage("transform", || {
            Ok(RateTable::from_payload(
                &payload,
                Some(settings.expected_base.as_str()),
                false,
            )?)
        })
        .await?;
    let batch = engine
        .transform_monetary(
            &raw,
            &schema(),
            &rates,
            &CurrencyConversion::for_base(&settings.expected_base),
        )
        .await?;

    let loader = DimensionalLoader::new(star())?;
    let counts = engine.load(&loader, &batch, warehouse).await?;
    Ok(engine.finish(raw.len(), None, counts))
}
