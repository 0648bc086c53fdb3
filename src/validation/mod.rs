//! Post-load data-quality expectations
//!
//! Expectations are evaluated against rows read back from the warehouse. All
//! expectations of a table are evaluated (collect-all) and each violation is
//! reported with its kind, column and a short detail.
//!
//! Nulls are ignored by every kind except `not_null`. A column missing from a
//! non-empty table fails every expectation declared on it. An empty table
//! passes vacuously.
//!
//! Uniqueness, value-set, regex and referential checks compare values by their
//! text rendering, so `Integer(1)` and `Text("1")` count as the same value.
//! Use a `type_membership` expectation when a column must hold a single type.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Record, Value, ValueType};

pub mod gate;

pub use gate::{ExpectationSuite, GateReport, ValidationGate};

/// Samples quoted in a failure detail
pub const MAX_SAMPLES: usize = 5;

/// One declared data-quality rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    NotNull {
        column: String,
    },
    TypeMembership {
        column: String,
        types: Vec<ValueType>,
    },
    /// Bounds are inclusive unless `strict`
    Range {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<RangeBound>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<RangeBound>,
        #[serde(default)]
        strict: bool,
    },
    ValueSet {
        column: String,
        values: Vec<String>,
    },
    Uniqueness {
        column: String,
    },
    Regex {
        column: String,
        pattern: String,
    },
    /// Every value exists in `table.key_column`
    Referential {
        column: String,
        table: String,
        key_column: String,
    },
}

/// A numeric or calendar bound of a range expectation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeBound {
    Number(f64),
    Date(NaiveDate),
}

impl RangeBound {
    fn compare(&self, value: &Value) -> Option<std::cmp::Ordering> {
        match self {
            RangeBound::Number(bound) => {
                let v = value
                    .as_f64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))?;
                v.partial_cmp(bound)
            }
            RangeBound::Date(bound) => value.as_date().map(|d| d.cmp(bound)),
        }
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::Number(n) => write!(f, "{n}"),
            RangeBound::Date(d) => write!(f, "{d}"),
        }
    }
}

impl Expectation {
    pub fn not_null(column: &str) -> Self {
        Self::NotNull {
            column: column.to_string(),
        }
    }

    pub fn type_membership(column: &str, types: &[ValueType]) -> Self {
        Self::TypeMembership {
            column: column.to_string(),
            types: types.to_vec(),
        }
    }

    pub fn at_least(column: &str, min: RangeBound) -> Self {
        Self::Range {
            column: column.to_string(),
            min: Some(min),
            max: None,
            strict: false,
        }
    }

    pub fn at_most(column: &str, max: RangeBound) -> Self {
        Self::Range {
            column: column.to_string(),
            min: None,
            max: Some(max),
            strict: false,
        }
    }

    pub fn greater_than(column: &str, min: RangeBound) -> Self {
        Self::Range {
            column: column.to_string(),
            min: Some(min),
            max: None,
            strict: true,
        }
    }

    pub fn value_set<S: AsRef<str>>(column: &str, values: &[S]) -> Self {
        Self::ValueSet {
            column: column.to_string(),
            values: values.iter().map(|v| v.as_ref().to_string()).collect(),
        }
    }

    pub fn unique(column: &str) -> Self {
        Self::Uniqueness {
            column: column.to_string(),
        }
    }

    pub fn matches(column: &str, pattern: &str) -> Self {
        Self::Regex {
            column: column.to_string(),
            pattern: pattern.to_string(),
        }
    }

    pub fn references(column: &str, table: &str, key_column: &str) -> Self {
        Self::Referential {
            column: column.to_string(),
            table: table.to_string(),
            key_column: key_column.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Expectation::NotNull { .. } => "not_null",
            Expectation::TypeMembership { .. } => "type_membership",
            Expectation::Range { .. } => "range",
            Expectation::ValueSet { .. } => "value_set",
            Expectation::Uniqueness { .. } => "uniqueness",
            Expectation::Regex { .. } => "regex",
            Expectation::Referential { .. } => "referential",
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Expectation::NotNull { column }
            | Expectation::TypeMembership { column, .. }
            | Expectation::Range { column, .. }
            | Expectation::ValueSet { column, .. }
            | Expectation::Uniqueness { column }
            | Expectation::Regex { column, .. }
            | Expectation::Referential { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedExpectation {
    pub expectation_kind: String,
    pub column: String,
    pub detail: String,
}

/// Outcome of every expectation declared for one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectationResult {
    pub table_name: String,
    pub success: bool,
    pub failures: Vec<FailedExpectation>,
}

/// Rendered key values of referenced tables, by `(table, key_column)`
pub type ReferenceValues = BTreeMap<(String, String), BTreeSet<String>>;

/// Evaluate `expectations` against persisted `rows`
pub fn validate(table_name: &str, rows: &[Record], expectations: &[Expectation]) -> ExpectationResult {
    validate_with_references(table_name, rows, expectations, &ReferenceValues::new())
}

/// Same as [`validate`], resolving referential expectations through `references`
pub fn validate_with_references(
    table_name: &str,
    rows: &[Record],
    expectations: &[Expectation],
    references: &ReferenceValues,
) -> ExpectationResult {
    let failures: Vec<FailedExpectation> = expectations
        .iter()
        .filter_map(|expectation| {
            evaluate(rows, expectation, references).map(|detail| FailedExpectation {
                expectation_kind: expectation.kind().to_string(),
                column: expectation.column().to_string(),
                detail,
            })
        })
        .collect();

    ExpectationResult {
        table_name: table_name.to_string(),
        success: failures.is_empty(),
        failures,
    }
}

/// `Some(detail)` when the expectation fails
fn evaluate(rows: &[Record], expectation: &Expectation, references: &ReferenceValues) -> Option<String> {
    if rows.is_empty() {
        return None;
    }
    let column = expectation.column();
    if !rows.iter().any(|r| r.contains_key(column)) {
        return Some(format!("column {column} not found"));
    }
    let values: Vec<&Value> = rows
        .iter()
        .map(|r| r.get(column).unwrap_or(&Value::Null))
        .collect();
    let non_null = || values.iter().copied().filter(|v| !v.is_null());

    match expectation {
        Expectation::NotNull { .. } => {
            let null_rows: Vec<usize> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_null())
                .map(|(i, _)| i)
                .collect();
            (!null_rows.is_empty()).then(|| {
                format!(
                    "{} null values, rows {:?}",
                    null_rows.len(),
                    &null_rows[..null_rows.len().min(MAX_SAMPLES)]
                )
            })
        }
        Expectation::TypeMembership { types, .. } => {
            let offenders: Vec<String> = non_null()
                .filter(|v| !types.contains(&v.value_type()))
                .map(|v| format!("{v} ({})", v.value_type()))
                .collect();
            describe(&offenders, "values of unexpected type")
        }
        Expectation::Range { min, max, strict, .. } => {
            let offenders: Vec<String> = non_null()
                .filter(|v| !in_range(v, min.as_ref(), max.as_ref(), *strict))
                .map(Value::to_string)
                .collect();
            let bounds = format!(
                "{}{}, {}{}",
                if *strict { "(" } else { "[" },
                min.map(|b| b.to_string()).unwrap_or_else(|| "-inf".to_string()),
                max.map(|b| b.to_string()).unwrap_or_else(|| "+inf".to_string()),
                if *strict { ")" } else { "]" },
            );
            describe(&offenders, &format!("values outside {bounds}"))
        }
        Expectation::ValueSet { values: allowed, .. } => {
            let offenders: Vec<String> = non_null()
                .map(Value::to_string)
                .filter(|v| !allowed.contains(v))
                .collect();
            describe(&offenders, "values outside the allowed set")
        }
        Expectation::Uniqueness { .. } => {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for v in non_null() {
                *counts.entry(v.to_string()).or_insert(0) += 1;
            }
            let duplicated: Vec<String> = counts
                .into_iter()
                .filter(|(_, n)| *n > 1)
                .map(|(v, n)| format!("{v} (x{n})"))
                .collect();
            describe(&duplicated, "duplicated values")
        }
        Expectation::Regex { pattern, .. } => match Regex::new(pattern) {
            Ok(regex) => {
                let offenders: Vec<String> = non_null()
                    .map(Value::to_string)
                    .filter(|v| !regex.is_match(v))
                    .collect();
                describe(&offenders, &format!("values not matching {pattern}"))
            }
            Err(e) => Some(format!("invalid pattern {pattern}: {e}")),
        },
        Expectation::Referential {
            table, key_column, ..
        } => match references.get(&(table.clone(), key_column.clone())) {
            Some(keys) => {
                let offenders: Vec<String> = non_null()
                    .map(Value::to_string)
                    .filter(|v| !keys.contains(v))
                    .collect();
                describe(&offenders, &format!("values missing from {table}.{key_column}"))
            }
            None => Some(format!("referenced column {table}.{key_column} not available")),
        },
    }
}

fn in_range(value: &Value, min: Option<&RangeBound>, max: Option<&RangeBound>, strict: bool) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};

    let above_min = min.map_or(true, |bound| match bound.compare(value) {
        Some(Greater) => true,
        Some(Equal) => !strict,
        _ => false,
    });
    let below_max = max.map_or(true, |bound| match bound.compare(value) {
        Some(Less) => true,
        Some(Equal) => !strict,
        _ => false,
    });
    above_min && below_max
}

fn describe(offenders: &[String], what: &str) -> Option<String> {
    if offenders.is_empty() {
        return None;
    }
    let samples = &offenders[..offenders.len().min(MAX_SAMPLES)];
    Some(format!("{} {what}, e.g. {samples:?}", offenders.len()))
}
