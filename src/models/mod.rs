use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::schema::ColumnSpec;

pub mod rates;

pub use rates::RatesPayload;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single loosely-typed cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

/// Runtime type of a [`Value`], used by type-membership expectations
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Null,
    Boolean,
    Integer,
    Float,
    Text,
    Date,
    Timestamp,
}

/// Column name to value; ordered so key tuples and exports are stable
pub type Record = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::Date(_) => ValueType::Date,
            Value::Timestamp(_) => ValueType::Timestamp,
        }
    }

    /// Numeric view; text is not parsed here
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Calendar date view; text is parsed with the accepted date formats
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            Value::Text(s) => parse_date(s),
            _ => None,
        }
    }

    /// Total order across variants: nulls first, then by variant, then by value
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Date(_) => 3,
            Value::Timestamp(_) => 4,
            Value::Text(_) => 5,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            Value::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

/// Parse a calendar date from the formats the extractors encounter
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        return Some(d);
    }
    parse_timestamp(s).map(|ts| ts.date())
}

/// Parse a timestamp from RFC 3339 or the common SQL-style layouts
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Records exactly as extracted; field names and types are not guaranteed
#[derive(Debug, Clone, Default)]
pub struct RawRecordBatch {
    pub source: String,
    pub records: Vec<Record>,
}

impl RawRecordBatch {
    pub fn new<S: Into<String>>(source: S, records: Vec<Record>) -> Self {
        Self {
            source: source.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append another batch, keeping record order
    pub fn extend(&mut self, other: RawRecordBatch) {
        self.records.extend(other.records);
    }
}

/// Records conforming to a declared schema
///
/// Only the transformer builds these, so every batch satisfies the key-column
/// non-null and uniqueness assertions of its schema.
#[derive(Debug, Clone)]
pub struct NormalizedRecordBatch {
    schema_name: String,
    columns: Vec<ColumnSpec>,
    records: Vec<Record>,
}

impl NormalizedRecordBatch {
    pub(crate) fn new(schema_name: String, columns: Vec<ColumnSpec>, records: Vec<Record>) -> Self {
        Self {
            schema_name,
            columns,
            records,
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Values of one column in record order; absent cells read as null
    pub fn column_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.records
            .iter()
            .map(move |r| r.get(name).unwrap_or(&Value::Null))
    }

    /// Add or replace a column, computing each cell from its record
    pub(crate) fn with_column<F>(mut self, spec: ColumnSpec, mut compute: F) -> Self
    where
        F: FnMut(&Record) -> Value,
    {
        for record in &mut self.records {
            let value = compute(record);
            record.insert(spec.name.clone(), value);
        }
        self.columns.retain(|c| c.name != spec.name);
        self.columns.push(spec);
        self
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// One row of a dimension table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionRow {
    pub natural_key: String,
    pub surrogate_key: i64,
    #[serde(skip)]
    pub attributes: BTreeMap<String, Value>,
}

/// One row of a fact table
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    /// Dimension name to surrogate key
    pub foreign_keys: BTreeMap<String, i64>,
    /// Null measures are absent and stored as SQL NULL
    pub measures: BTreeMap<String, f64>,
    /// Descriptive columns kept on the fact (degenerate dimensions)
    pub attributes: BTreeMap<String, Value>,
    pub date: Option<NaiveDate>,
}

/// Distinct rendered values of a column, nulls skipped
pub fn distinct_text<'a, I>(values: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Value>,
{
    values
        .into_iter()
        .filter(|v| !v.is_null())
        .map(|v| v.to_string())
        .collect()
}
