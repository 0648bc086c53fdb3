//! Currency conversion against a reference rate table

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::config::DEFAULT_AMOUNT_PRECISION;
use crate::errors::{RateCoverageError, SchemaValidationError, TransformError};
use crate::models::{parse_date, NormalizedRecordBatch, RatesPayload, RawRecordBatch, Record, Value};
use crate::schema::ColumnSpec;

/// Units of each currency per one unit of the base currency
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    base: String,
    date: Option<NaiveDate>,
    rates: BTreeMap<String, f64>,
}

impl RateTable {
    /// Build a table from known-good rates; unusable rates are dropped
    pub fn new<I, S>(base: &str, rates: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut table = Self {
            base: base.trim().to_uppercase(),
            date: None,
            rates: BTreeMap::new(),
        };
        for (symbol, rate) in rates {
            table.insert(symbol.as_ref(), rate);
        }
        table
    }

    /// Validate a payload and build its table
    ///
    /// `expected_base`, when given, must match the payload base. When
    /// `require_date` is set the payload must carry a `run_date` or `date`.
    pub fn from_payload(
        payload: &RatesPayload,
        expected_base: Option<&str>,
        require_date: bool,
    ) -> Result<Self, SchemaValidationError> {
        let base = payload
            .base
            .as_deref()
            .map(|b| b.trim().to_uppercase())
            .filter(|b| !b.is_empty());
        let date_text = payload.effective_date();

        let mut missing = Vec::new();
        if base.is_none() {
            missing.push("base");
        }
        if payload.rates.is_empty() {
            missing.push("rates");
        }
        if require_date && date_text.is_none() {
            missing.push("date");
        }
        let Some(base) = base.filter(|_| missing.is_empty()) else {
            return Err(SchemaValidationError::IncompletePayload {
                missing: missing.join("/"),
            });
        };

        if let Some(expected) = expected_base {
            if !base.eq_ignore_ascii_case(expected.trim()) {
                return Err(SchemaValidationError::UnexpectedBase {
                    expected: expected.trim().to_uppercase(),
                    actual: base,
                });
            }
        }

        let date = match date_text {
            Some(text) => Some(parse_date(text).ok_or_else(|| SchemaValidationError::Coercion {
                column: "date".to_string(),
                value: text.to_string(),
                target: "date".to_string(),
            })?),
            None => None,
        };

        let mut table = Self {
            base,
            date,
            rates: BTreeMap::new(),
        };
        for (symbol, raw) in &payload.rates {
            match Value::from(raw.clone()) {
                Value::Text(s) => match s.trim().parse::<f64>() {
                    Ok(rate) => table.insert(symbol, rate),
                    Err(_) => warn!(symbol = %symbol, value = %s, "dropping non-numeric rate"),
                },
                other => match other.as_f64() {
                    Some(rate) => table.insert(symbol, rate),
                    None => warn!(symbol = %symbol, value = %raw, "dropping non-numeric rate"),
                },
            }
        }

        if table.rates.is_empty() {
            return Err(SchemaValidationError::IncompletePayload {
                missing: "rates".to_string(),
            });
        }
        debug!(base = %table.base, rates = table.rates.len(), "rate table built");
        Ok(table)
    }

    fn insert(&mut self, symbol: &str, rate: f64) {
        let symbol = symbol.trim().to_uppercase();
        if !rate.is_finite() || rate <= 0.0 {
            warn!(symbol = %symbol, rate, "dropping unusable rate");
            return;
        }
        self.rates.insert(symbol, rate);
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn rate(&self, symbol: &str) -> Option<f64> {
        self.rates.get(symbol).copied()
    }

    /// Multiplier converting one unit of `symbol` into the base currency
    pub fn rate_to_base(&self, symbol: &str) -> Option<f64> {
        if symbol == self.base {
            return self.rate(symbol).map(|_| 1.0);
        }
        self.rate(symbol).map(|rate| 1.0 / rate)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.rates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// One `(date, base, symbol, rate)` record per rate, symbols ascending
    pub fn to_raw_batch(&self, source: &str) -> RawRecordBatch {
        let date = self.date.map(Value::Date).unwrap_or(Value::Null);
        let records = self
            .rates
            .iter()
            .map(|(symbol, rate)| {
                let mut record = Record::new();
                record.insert("date".to_string(), date.clone());
                record.insert("base".to_string(), Value::Text(self.base.clone()));
                record.insert("symbol".to_string(), Value::Text(symbol.clone()));
                record.insert("rate".to_string(), Value::Float(*rate));
                record
            })
            .collect();
        RawRecordBatch::new(source, records)
    }
}

/// How monetary records are converted into the base currency
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyConversion {
    pub currency_column: String,
    pub amount_column: String,
    /// Receives `amount / rate`, rounded
    pub output_column: String,
    /// Receives the per-unit multiplier into the base currency
    pub rate_column: String,
    pub precision: u32,
}

impl Default for CurrencyConversion {
    fn default() -> Self {
        Self::for_base("EUR")
    }
}

impl CurrencyConversion {
    /// Conventional column names for a base: `amount_eur`, `rate_to_eur`
    pub fn for_base(base: &str) -> Self {
        let suffix = base.trim().to_lowercase();
        Self {
            currency_column: "currency".to_string(),
            amount_column: "amount".to_string(),
            output_column: format!("amount_{suffix}"),
            rate_column: format!("rate_to_{suffix}"),
            precision: DEFAULT_AMOUNT_PRECISION,
        }
    }

    /// Convert every amount of `batch`; fails without output if any currency lacks a rate
    pub fn apply(
        &self,
        batch: NormalizedRecordBatch,
        rates: &RateTable,
    ) -> Result<NormalizedRecordBatch, TransformError> {
        if !batch.is_empty() && !batch.has_column(&self.currency_column) {
            return Err(SchemaValidationError::MissingColumn {
                schema: batch.schema_name().to_string(),
                column: self.currency_column.clone(),
            }
            .into());
        }

        let mut missing = BTreeSet::new();
        for (row, value) in batch.column_values(&self.currency_column).enumerate() {
            let Value::Text(symbol) = value else {
                return Err(SchemaValidationError::NullInKeyColumn {
                    column: self.currency_column.clone(),
                    row,
                }
                .into());
            };
            if rates.rate(symbol).is_none() {
                missing.insert(symbol.clone());
            }
        }
        if !missing.is_empty() {
            return Err(RateCoverageError {
                missing: missing.into_iter().collect(),
            }
            .into());
        }

        let scale = 10f64.powi(self.precision as i32);
        let symbol_of = |record: &Record| {
            record
                .get(&self.currency_column)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let converted = batch
            .with_column(ColumnSpec::float(self.output_column.clone()), |record| {
                let amount = record.get(&self.amount_column).and_then(Value::as_f64);
                let rate = symbol_of(record).and_then(|s| rates.rate(&s));
                match (amount, rate) {
                    (Some(amount), Some(rate)) => Value::Float((amount / rate * scale).round() / scale),
                    _ => Value::Null,
                }
            })
            .with_column(ColumnSpec::float(self.rate_column.clone()), |record| {
                symbol_of(record)
                    .and_then(|s| rates.rate_to_base(&s))
                    .map(Value::Float)
                    .unwrap_or(Value::Null)
            });

        debug!(
            rows = converted.len(),
            base = %rates.base(),
            output = %self.output_column,
            "amounts converted"
        );
        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaSpec;
    use crate::transform::Transformer;

    fn tx_schema() -> SchemaSpec {
        SchemaSpec::new("transactions")
            .column(ColumnSpec::integer("user_id"))
            .column(ColumnSpec::float("amount"))
            .column(ColumnSpec::text("currency").uppercase().required())
            .column(ColumnSpec::date("date"))
    }

    fn tx(currency: &str, amount: f64) -> Record {
        let mut r = Record::new();
        r.insert("user_id".to_string(), Value::Integer(1));
        r.insert("amount".to_string(), Value::Float(amount));
        r.insert("currency".to_string(), Value::from(currency));
        r.insert("date".to_string(), Value::from("2025-08-13"));
        r
    }

    #[test]
    fn test_amounts_converted_and_rounded() {
        let rates = RateTable::new("EUR", [("USD", 1.1), ("EUR", 1.0)]);
        let raw = RawRecordBatch::new("tx.csv", vec![tx("usd", 10.0), tx("EUR", 5.0)]);

        let batch = Transformer::default()
            .transform_monetary(&raw, &tx_schema(), &rates, &CurrencyConversion::default())
            .unwrap();

        let amounts: Vec<Value> = batch.column_values("amount_eur").cloned().collect();
        assert_eq!(amounts, vec![Value::Float(9.09), Value::Float(5.0)]);
        let to_eur: Vec<f64> = batch
            .column_values("rate_to_eur")
            .filter_map(Value::as_f64)
            .collect();
        assert!((to_eur[0] - 1.0 / 1.1).abs() < 1e-12);
        assert_eq!(to_eur[1], 1.0);
    }

    #[test]
    fn test_missing_coverage_fails_whole_batch() {
        let rates = RateTable::new("EUR", [("USD", 1.1)]);
        let raw = RawRecordBatch::new(
            "tx.csv",
            vec![tx("USD", 10.0), tx("XXX", 1.0), tx("AAA", 2.0)],
        );

        let err = Transformer::default()
            .transform_monetary(&raw, &tx_schema(), &rates, &CurrencyConversion::default())
            .unwrap_err();
        assert_eq!(
            err,
            TransformError::RateCoverage(RateCoverageError {
                missing: vec!["AAA".to_string(), "XXX".to_string()]
            })
        );
    }

    #[test]
    fn test_payload_validation() {
        let incomplete = RatesPayload::default();
        let err = RateTable::from_payload(&incomplete, None, true).unwrap_err();
        assert_eq!(
            err,
            SchemaValidationError::IncompletePayload {
                missing: "base/rates/date".to_string()
            }
        );

        let usd_based: RatesPayload = serde_json::from_value(serde_json::json!({
            "base": "USD",
            "rates": {"EUR": 0.9}
        }))
        .unwrap();
        let err = RateTable::from_payload(&usd_based, Some("EUR"), false).unwrap_err();
        assert!(matches!(err, SchemaValidationError::UnexpectedBase { .. }));
    }

    #[test]
    fn test_zero_and_negative_rates_dropped() {
        let payload: RatesPayload = serde_json::from_value(serde_json::json!({
            "base": "eur",
            "rates": {"usd": 1.1, "gbp": 0, "jpy": -3, "chf": "0.95"},
            "date": "2025-08-13"
        }))
        .unwrap();

        let table = RateTable::from_payload(&payload, Some("EUR"), true).unwrap();
        assert_eq!(table.base(), "EUR");
        assert_eq!(table.symbols().collect::<Vec<_>>(), vec!["CHF", "USD"]);
        assert_eq!(table.date(), NaiveDate::from_ymd_opt(2025, 8, 13));
    }

    #[test]
    fn test_rate_rows_sorted_by_symbol() {
        let mut table = RateTable::new("EUR", [("USD", 1.1), ("GBP", 0.85)]);
        table.date = NaiveDate::from_ymd_opt(2025, 8, 13);
        let raw = table.to_raw_batch("rates");
        let symbols: Vec<&str> = raw
            .records
            .iter()
            .filter_map(|r| r.get("symbol").and_then(Value::as_str))
            .collect();
        assert_eq!(symbols, vec!["GBP", "USD"]);
    }
}
