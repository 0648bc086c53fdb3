//! Transformer: raw batches to schema-conforming batches
//!
//! The transformer is pure. It normalizes field names, coerces cells into their
//! declared types, computes derived columns and enforces the key-column
//! assertions of the schema. The monetary variant additionally converts
//! amounts through a [`RateTable`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::errors::{SchemaValidationError, TransformError};
use crate::models::{NormalizedRecordBatch, RawRecordBatch, Record, Value};
use crate::schema::{ColumnSpec, SchemaSpec};

pub mod coercion;
pub mod currency;

pub use coercion::CoercionPolicy;
pub use currency::{CurrencyConversion, RateTable};

use coercion::coerce_value;

/// Field names are matched after trimming and lower-casing
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer {
    policy: CoercionPolicy,
}

impl Transformer {
    pub fn new(policy: CoercionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CoercionPolicy {
        self.policy
    }

    /// Map a raw batch onto `schema`
    pub fn transform(
        &self,
        raw: &RawRecordBatch,
        schema: &SchemaSpec,
    ) -> Result<NormalizedRecordBatch, SchemaValidationError> {
        let renamed: Vec<BTreeMap<String, &Value>> = raw
            .records
            .iter()
            .enumerate()
            .map(|(row, record)| normalize_fields(record, &raw.source, row))
            .collect();

        let present: BTreeSet<&str> = renamed
            .iter()
            .flat_map(|record| record.keys().map(String::as_str))
            .collect();

        if !raw.is_empty() {
            if let Some(missing) = schema
                .columns
                .iter()
                .find(|c| c.required && !present.contains(c.name.as_str()))
            {
                return Err(SchemaValidationError::MissingColumn {
                    schema: schema.name.clone(),
                    column: missing.name.clone(),
                });
            }
        }

        let mut columns: Vec<ColumnSpec> = schema
            .columns
            .iter()
            .filter(|c| present.contains(c.name.as_str()))
            .cloned()
            .collect();

        let mut records = Vec::with_capacity(renamed.len());
        for (row, fields) in renamed.iter().enumerate() {
            let mut record = Record::new();
            for column in &columns {
                let raw_value = fields.get(&column.name).copied().unwrap_or(&Value::Null);
                let mut value = coerce_value(raw_value, column, self.policy, row)?;
                if value.is_null() {
                    if let Some(default) = &column.default {
                        value = default.clone();
                    }
                }
                if column.uppercase {
                    if let Value::Text(s) = &value {
                        value = Value::Text(s.to_uppercase());
                    }
                }
                record.insert(column.name.clone(), value);
            }
            records.push(record);
        }

        for derived in &schema.derived {
            let available = derived
                .inputs
                .iter()
                .all(|input| columns.iter().any(|c| &c.name == input));
            if !available {
                debug!(
                    schema = %schema.name,
                    column = %derived.name,
                    "derived column omitted, inputs absent"
                );
                continue;
            }
            for record in &mut records {
                let inputs: Vec<&Value> = derived
                    .inputs
                    .iter()
                    .map(|input| record.get(input).unwrap_or(&Value::Null))
                    .collect();
                let value = (derived.compute)(&inputs);
                record.insert(derived.name.clone(), value);
            }
            columns.retain(|c| c.name != derived.name);
            columns.push(derived.spec());
        }

        check_key_columns(schema, &columns, &records)?;

        if let Some(sort_key) = &schema.sort_key {
            records.sort_by(|a, b| {
                let left = a.get(sort_key).unwrap_or(&Value::Null);
                let right = b.get(sort_key).unwrap_or(&Value::Null);
                left.total_cmp(right)
            });
        }

        debug!(
            schema = %schema.name,
            source = %raw.source,
            rows = records.len(),
            columns = columns.len(),
            "batch transformed"
        );
        Ok(NormalizedRecordBatch::new(schema.name.clone(), columns, records))
    }

    /// Transform monetary records and convert their amounts through `rates`
    ///
    /// Coverage is checked for the whole batch before any amount is converted.
    pub fn transform_monetary(
        &self,
        raw: &RawRecordBatch,
        schema: &SchemaSpec,
        rates: &RateTable,
        conversion: &CurrencyConversion,
    ) -> Result<NormalizedRecordBatch, TransformError> {
        let batch = self.transform(raw, schema)?;
        conversion.apply(batch, rates)
    }
}

/// Rename fields of one record; the first field wins when two names collide
fn normalize_fields<'a>(record: &'a Record, source: &str, row: usize) -> BTreeMap<String, &'a Value> {
    let mut fields = BTreeMap::new();
    for (name, value) in record {
        let normalized = normalize_column_name(name);
        if fields.contains_key(&normalized) {
            warn!(
                source = %source,
                row,
                field = %name,
                column = %normalized,
                "duplicate field after name normalization dropped"
            );
            continue;
        }
        fields.insert(normalized, value);
    }
    fields
}

/// Non-null over present key and `not_null` columns, then uniqueness over keys plus `unique_with`
fn check_key_columns(
    schema: &SchemaSpec,
    columns: &[ColumnSpec],
    records: &[Record],
) -> Result<(), SchemaValidationError> {
    let is_present = |name: &&String| columns.iter().any(|c| &c.name == *name);
    let key_columns: Vec<&String> = schema.key_columns.iter().filter(is_present).collect();
    let non_null_columns: Vec<&String> = key_columns
        .iter()
        .copied()
        .chain(schema.not_null.iter().filter(is_present))
        .collect();

    for (row, record) in records.iter().enumerate() {
        for column in &non_null_columns {
            if record.get(*column).map_or(true, Value::is_null) {
                return Err(SchemaValidationError::NullInKeyColumn {
                    column: column.to_string(),
                    row,
                });
            }
        }
    }

    if key_columns.is_empty() {
        return Ok(());
    }

    let unique_columns: Vec<&String> = key_columns
        .iter()
        .copied()
        .chain(schema.unique_with.iter().filter(is_present))
        .collect();

    let mut seen = BTreeSet::new();
    for record in records {
        let key: Vec<String> = unique_columns
            .iter()
            .map(|c| record.get(*c).map(Value::to_string).unwrap_or_default())
            .collect();
        if seen.contains(&key) {
            return Err(SchemaValidationError::DuplicateKey {
                columns: join(&unique_columns),
                key: key.join(", "),
            });
        }
        seen.insert(key);
    }
    Ok(())
}

fn join(columns: &[&String]) -> String {
    columns
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{product, ColumnType, DerivedColumn};

    fn record(fields: &[(&str, Value)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn sales_schema() -> SchemaSpec {
        SchemaSpec::new("sales")
            .column(ColumnSpec::text("order_id"))
            .column(ColumnSpec::text("product_id"))
            .column(ColumnSpec::date("order_date"))
            .column(ColumnSpec::float("quantity").with_default(0.0))
            .column(ColumnSpec::float("price").with_default(0.0))
            .derived(DerivedColumn::new(
                "revenue",
                ColumnType::Float,
                &["quantity", "price"],
                product,
            ))
            .key_columns(&["order_id", "product_id"])
            .unique_with(&["order_date"])
    }

    #[test]
    fn test_names_normalized_and_revenue_derived() {
        let raw = RawRecordBatch::new(
            "sales.csv",
            vec![record(&[
                (" Order_ID ", Value::from("1")),
                ("PRODUCT_ID", Value::from("P1")),
                ("Quantity", Value::from("3")),
                ("price", Value::from("2.5")),
                ("ignored", Value::from("x")),
            ])],
        );

        let batch = Transformer::default().transform(&raw, &sales_schema()).unwrap();
        let row = &batch.records()[0];
        assert_eq!(row.get("order_id"), Some(&Value::from("1")));
        assert_eq!(row.get("revenue"), Some(&Value::Float(7.5)));
        assert!(row.get("ignored").is_none());
        assert!(batch.has_column("revenue"));
        assert!(!batch.has_column("order_date"));
    }

    #[test]
    fn test_derived_column_omitted_without_inputs() {
        let raw = RawRecordBatch::new(
            "sales.csv",
            vec![record(&[
                ("order_id", Value::from("1")),
                ("product_id", Value::from("P1")),
                ("quantity", Value::from("3")),
            ])],
        );

        let batch = Transformer::default().transform(&raw, &sales_schema()).unwrap();
        assert!(!batch.has_column("revenue"));
        assert!(batch.records()[0].get("revenue").is_none());
    }

    #[test]
    fn test_unparseable_numeric_becomes_zero_sentinel() {
        let raw = RawRecordBatch::new(
            "sales.csv",
            vec![record(&[
                ("order_id", Value::from("1")),
                ("product_id", Value::from("P1")),
                ("quantity", Value::from("three")),
                ("price", Value::from("")),
            ])],
        );

        let batch = Transformer::default().transform(&raw, &sales_schema()).unwrap();
        let row = &batch.records()[0];
        assert_eq!(row.get("quantity"), Some(&Value::Float(0.0)));
        // empty cell falls back to the column default
        assert_eq!(row.get("price"), Some(&Value::Float(0.0)));
        assert_eq!(row.get("revenue"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn test_non_finite_numerics_become_zero_sentinel() {
        let raw = RawRecordBatch::new(
            "sales.csv",
            vec![record(&[
                ("order_id", Value::from("1")),
                ("product_id", Value::from("P1")),
                ("quantity", Value::from("NaN")),
                ("price", Value::from("inf")),
            ])],
        );

        let batch = Transformer::default().transform(&raw, &sales_schema()).unwrap();
        let row = &batch.records()[0];
        assert_eq!(row.get("quantity"), Some(&Value::Float(0.0)));
        assert_eq!(row.get("price"), Some(&Value::Float(0.0)));
        assert_eq!(row.get("revenue"), Some(&Value::Float(0.0)));

        let err = Transformer::new(CoercionPolicy::Strict)
            .transform(&raw, &sales_schema())
            .unwrap_err();
        assert!(matches!(err, SchemaValidationError::Coercion { .. }));
    }

    #[test]
    fn test_colliding_field_names_keep_first() {
        let raw = RawRecordBatch::new(
            "sales.csv",
            vec![record(&[
                ("order_id", Value::from("1")),
                ("product_id", Value::from("P1")),
                (" price ", Value::from("5")),
                ("Price", Value::from("7")),
            ])],
        );

        let batch = Transformer::default().transform(&raw, &sales_schema()).unwrap();
        assert_eq!(batch.records()[0].get("price"), Some(&Value::Float(5.0)));
    }

    #[test]
    fn test_not_null_column_rejects_null_without_uniqueness() {
        let schema = SchemaSpec::new("events")
            .column(ColumnSpec::integer("user_id"))
            .column(ColumnSpec::text("event").required())
            .not_null(&["event"]);

        let repeated = RawRecordBatch::new(
            "events.json",
            vec![
                record(&[("user_id", Value::Integer(1)), ("event", Value::from("login"))]),
                record(&[("user_id", Value::Integer(2)), ("event", Value::from("login"))]),
            ],
        );
        assert_eq!(Transformer::default().transform(&repeated, &schema).unwrap().len(), 2);

        let missing = RawRecordBatch::new(
            "events.json",
            vec![
                record(&[("user_id", Value::Integer(1)), ("event", Value::from("login"))]),
                record(&[("user_id", Value::Integer(2)), ("event", Value::Null)]),
            ],
        );
        let err = Transformer::default().transform(&missing, &schema).unwrap_err();
        assert_eq!(
            err,
            SchemaValidationError::NullInKeyColumn {
                column: "event".to_string(),
                row: 1
            }
        );
    }

    #[test]
    fn test_strict_policy_fails_batch() {
        let raw = RawRecordBatch::new(
            "sales.csv",
            vec![record(&[
                ("order_id", Value::from("1")),
                ("product_id", Value::from("P1")),
                ("quantity", Value::from("three")),
            ])],
        );

        let err = Transformer::new(CoercionPolicy::Strict)
            .transform(&raw, &sales_schema())
            .unwrap_err();
        assert!(matches!(err, SchemaValidationError::Coercion { .. }));
    }

    #[test]
    fn test_null_in_key_column() {
        let raw = RawRecordBatch::new(
            "sales.csv",
            vec![
                record(&[("order_id", Value::from("1")), ("product_id", Value::from("P1"))]),
                record(&[("order_id", Value::from(" ")), ("product_id", Value::from("P2"))]),
            ],
        );

        let err = Transformer::default().transform(&raw, &sales_schema()).unwrap_err();
        assert_eq!(
            err,
            SchemaValidationError::NullInKeyColumn {
                column: "order_id".to_string(),
                row: 1
            }
        );
    }

    #[test]
    fn test_duplicate_key_includes_unique_with_columns() {
        let same_day = [
            ("order_id", Value::from("1")),
            ("product_id", Value::from("P1")),
            ("order_date", Value::from("2025-08-01")),
        ];
        let other_day = [
            ("order_id", Value::from("1")),
            ("product_id", Value::from("P1")),
            ("order_date", Value::from("2025-08-02")),
        ];

        let distinct = RawRecordBatch::new("s", vec![record(&same_day), record(&other_day)]);
        assert!(Transformer::default().transform(&distinct, &sales_schema()).is_ok());

        let duplicated = RawRecordBatch::new("s", vec![record(&same_day), record(&same_day)]);
        let err = Transformer::default()
            .transform(&duplicated, &sales_schema())
            .unwrap_err();
        assert!(err.to_string().starts_with("duplicate key"));
    }

    #[test]
    fn test_required_column_missing() {
        let schema = SchemaSpec::new("events")
            .column(ColumnSpec::integer("user_id").required())
            .column(ColumnSpec::text("event"));
        let raw = RawRecordBatch::new("events.json", vec![record(&[("event", Value::from("login"))])]);

        let err = Transformer::default().transform(&raw, &schema).unwrap_err();
        assert!(matches!(err, SchemaValidationError::MissingColumn { .. }));

        // an empty batch has nothing to check
        let empty = RawRecordBatch::new("events.json", vec![]);
        assert!(Transformer::default().transform(&empty, &schema).unwrap().is_empty());
    }

    #[test]
    fn test_sort_key_orders_output() {
        let schema = SchemaSpec::new("rates")
            .column(ColumnSpec::text("symbol"))
            .column(ColumnSpec::float("rate"))
            .sort_by("symbol");
        let raw = RawRecordBatch::new(
            "rates.json",
            vec![
                record(&[("symbol", Value::from("USD")), ("rate", Value::Float(1.1))]),
                record(&[("symbol", Value::from("GBP")), ("rate", Value::Float(0.85))]),
            ],
        );

        let batch = Transformer::default().transform(&raw, &schema).unwrap();
        let symbols: Vec<String> = batch.column_values("symbol").map(|v| v.to_string()).collect();
        assert_eq!(symbols, vec!["GBP", "USD"]);
    }
}
