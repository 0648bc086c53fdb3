//! Cell coercion into declared column types

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::SchemaValidationError;
use crate::models::{parse_timestamp, Value};
use crate::schema::{ColumnSpec, ColumnType};

/// What to do with a value that does not parse as its declared type
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CoercionPolicy {
    /// Numerics degrade to the zero sentinel, dates to null, each with a warning
    #[default]
    Lenient,
    /// Any unparseable value fails the batch
    Strict,
}

/// Coerce one cell to the column's declared type
pub(crate) fn coerce_value(
    value: &Value,
    column: &ColumnSpec,
    policy: CoercionPolicy,
    row: usize,
) -> Result<Value, SchemaValidationError> {
    let value = match value {
        Value::Text(s) if s.trim().is_empty() => return Ok(Value::Null),
        Value::Null => return Ok(Value::Null),
        other => other,
    };

    let coerced = match column.column_type {
        ColumnType::Integer => to_integer(value),
        ColumnType::Float => to_float(value),
        ColumnType::Text => Some(Value::Text(value.to_string().trim().to_string())),
        ColumnType::Date => value.as_date().map(Value::Date),
        ColumnType::Timestamp => to_timestamp(value),
    };

    match coerced {
        Some(v) => Ok(v),
        None => fallback(value, column, policy, row),
    }
}

fn fallback(
    value: &Value,
    column: &ColumnSpec,
    policy: CoercionPolicy,
    row: usize,
) -> Result<Value, SchemaValidationError> {
    if policy == CoercionPolicy::Strict {
        return Err(SchemaValidationError::Coercion {
            column: column.name.clone(),
            value: value.to_string(),
            target: column.column_type.to_string(),
        });
    }

    let sentinel = match column.column_type {
        ColumnType::Integer => Value::Integer(0),
        ColumnType::Float => Value::Float(0.0),
        _ => Value::Null,
    };
    warn!(
        column = %column.name,
        row,
        value = %value,
        target = %column.column_type,
        sentinel = %sentinel,
        "lenient coercion replaced unparseable value"
    );
    Ok(sentinel)
}

fn to_float(value: &Value) -> Option<Value> {
    match value {
        Value::Integer(i) => Some(Value::Float(*i as f64)),
        Value::Float(f) if f.is_finite() => Some(Value::Float(*f)),
        Value::Bool(b) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
        // NaN and infinities parse but are not usable measures
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float),
        _ => None,
    }
}

fn to_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Integer(i) => Some(Value::Integer(*i)),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(Value::Integer(*f as i64)),
        Value::Bool(b) => Some(Value::Integer(i64::from(*b))),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().map(Value::Integer).or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.is_finite())
                    .map(|f| Value::Integer(f as i64))
            })
        }
        _ => None,
    }
}

fn to_timestamp(value: &Value) -> Option<Value> {
    match value {
        Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
        Value::Date(d) => d.and_hms_opt(0, 0, 0).map(Value::Timestamp),
        Value::Text(s) => parse_timestamp(s).map(Value::Timestamp),
        _ => None,
    }
}
