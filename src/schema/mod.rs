//! Declarative value objects describing record schemas and star layouts
//!
//! A concrete pipeline is a set of these declarations: the transformer reads a
//! [`SchemaSpec`], the loader reads a [`StarSchema`].

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::LoadError;
use crate::models::Value;

/// Declared storage type of a column
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    /// SQLite storage class; dates travel as ISO text
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Text | ColumnType::Date | ColumnType::Timestamp => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    /// Absence from a non-empty batch is an error
    pub required: bool,
    /// Text values are upper-cased after coercion
    pub uppercase: bool,
    /// Substituted when the coerced value is null
    pub default: Option<Value>,
}

impl ColumnSpec {
    pub fn new<S: Into<String>>(name: S, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            required: false,
            uppercase: false,
            default: None,
        }
    }

    pub fn integer<S: Into<String>>(name: S) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn float<S: Into<String>>(name: S) -> Self {
        Self::new(name, ColumnType::Float)
    }

    pub fn text<S: Into<String>>(name: S) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn date<S: Into<String>>(name: S) -> Self {
        Self::new(name, ColumnType::Date)
    }

    pub fn timestamp<S: Into<String>>(name: S) -> Self {
        Self::new(name, ColumnType::Timestamp)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn uppercase(mut self) -> Self {
        self.uppercase = true;
        self
    }

    pub fn with_default<V: Into<Value>>(mut self, value: V) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Function computing a derived cell from its input cells, in declared order
pub type DeriveFn = fn(&[&Value]) -> Value;

/// A column computed from other columns of the same record
#[derive(Clone)]
pub struct DerivedColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub inputs: Vec<String>,
    pub compute: DeriveFn,
}

impl DerivedColumn {
    pub fn new<S: Into<String>>(
        name: S,
        column_type: ColumnType,
        inputs: &[&str],
        compute: DeriveFn,
    ) -> Self {
        Self {
            name: name.into(),
            column_type,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            compute,
        }
    }

    pub fn spec(&self) -> ColumnSpec {
        ColumnSpec::new(self.name.clone(), self.column_type)
    }
}

impl fmt::Debug for DerivedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedColumn")
            .field("name", &self.name)
            .field("column_type", &self.column_type)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// Product of two numeric inputs; null when either side is null
pub fn product(inputs: &[&Value]) -> Value {
    match inputs {
        [a, b] => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Value::Float(a * b),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// Calendar date of a timestamp input
pub fn date_of(inputs: &[&Value]) -> Value {
    inputs
        .first()
        .and_then(|v| v.as_date())
        .map(Value::Date)
        .unwrap_or(Value::Null)
}

/// Declared shape of a normalized batch
#[derive(Debug, Clone)]
pub struct SchemaSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub derived: Vec<DerivedColumn>,
    /// Columns that must be non-null and unique as a tuple
    pub key_columns: Vec<String>,
    /// Extra columns joined to the key tuple for the uniqueness check only
    pub unique_with: Vec<String>,
    /// Columns that must be non-null without being unique
    pub not_null: Vec<String>,
    pub sort_key: Option<String>,
}

impl SchemaSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            derived: Vec::new(),
            key_columns: Vec::new(),
            unique_with: Vec::new(),
            not_null: Vec::new(),
            sort_key: None,
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn derived(mut self, derived: DerivedColumn) -> Self {
        self.derived.push(derived);
        self
    }

    pub fn key_columns(mut self, columns: &[&str]) -> Self {
        self.key_columns = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn unique_with(mut self, columns: &[&str]) -> Self {
        self.unique_with = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn not_null(mut self, columns: &[&str]) -> Self {
        self.not_null = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn sort_by<S: Into<String>>(mut self, column: S) -> Self {
        self.sort_key = Some(column.into());
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A dimension table keyed by a natural key taken from one batch column
#[derive(Debug, Clone)]
pub struct DimensionSpec {
    /// Logical name, used as the key in [`crate::models::FactRow::foreign_keys`]
    pub name: String,
    pub table: String,
    pub surrogate_key: String,
    pub natural_key: String,
    /// Batch column holding the natural key
    pub source_column: String,
    /// Batch columns copied onto the dimension row
    pub attributes: Vec<ColumnSpec>,
}

impl DimensionSpec {
    pub fn new(name: &str, table: &str, surrogate_key: &str, natural_key: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            surrogate_key: surrogate_key.to_string(),
            natural_key: natural_key.to_string(),
            source_column: natural_key.to_string(),
            attributes: Vec::new(),
        }
    }

    pub fn from_column<S: Into<String>>(mut self, column: S) -> Self {
        self.source_column = column.into();
        self
    }

    pub fn attribute(mut self, column: ColumnSpec) -> Self {
        self.attributes.push(column);
        self
    }
}

/// The fact table of a star
#[derive(Debug, Clone)]
pub struct FactSpec {
    pub table: String,
    /// Names of the dimensions this fact references
    pub dimensions: Vec<String>,
    /// Descriptive columns stored on the fact row
    pub columns: Vec<ColumnSpec>,
    pub measures: Vec<ColumnSpec>,
    pub date_column: Option<String>,
}

impl FactSpec {
    pub fn new<S: Into<String>>(table: S) -> Self {
        Self {
            table: table.into(),
            dimensions: Vec::new(),
            columns: Vec::new(),
            measures: Vec::new(),
            date_column: None,
        }
    }

    pub fn references(mut self, dimension: &str) -> Self {
        self.dimensions.push(dimension.to_string());
        self
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn measure<S: Into<String>>(mut self, name: S) -> Self {
        self.measures.push(ColumnSpec::float(name));
        self
    }

    pub fn dated<S: Into<String>>(mut self, column: S) -> Self {
        self.date_column = Some(column.into());
        self
    }
}

/// One fact table and the dimensions it references
#[derive(Debug, Clone)]
pub struct StarSchema {
    pub dimensions: Vec<DimensionSpec>,
    pub fact: FactSpec,
}

impl StarSchema {
    pub fn new(fact: FactSpec) -> Self {
        Self {
            dimensions: Vec::new(),
            fact,
        }
    }

    pub fn dimension(mut self, dimension: DimensionSpec) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn find_dimension(&self, name: &str) -> Option<&DimensionSpec> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Check that the declaration is internally consistent
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.dimensions.is_empty() {
            return Err(LoadError::InvalidStar(format!(
                "fact table {} references no dimension",
                self.fact.table
            )));
        }

        let mut tables = BTreeSet::new();
        let mut names = BTreeSet::new();
        for dim in &self.dimensions {
            if !names.insert(dim.name.as_str()) {
                return Err(LoadError::InvalidStar(format!(
                    "dimension {} declared twice",
                    dim.name
                )));
            }
            if !tables.insert(dim.table.as_str()) {
                return Err(LoadError::InvalidStar(format!(
                    "table {} used by two dimensions",
                    dim.table
                )));
            }
            if dim.surrogate_key == dim.natural_key {
                return Err(LoadError::InvalidStar(format!(
                    "dimension {} uses {} as both surrogate and natural key",
                    dim.name, dim.natural_key
                )));
            }
        }

        if tables.contains(self.fact.table.as_str()) {
            return Err(LoadError::InvalidStar(format!(
                "fact table {} collides with a dimension table",
                self.fact.table
            )));
        }

        for name in &self.fact.dimensions {
            if self.find_dimension(name).is_none() {
                return Err(LoadError::InvalidStar(format!(
                    "fact table {} references unknown dimension {}",
                    self.fact.table, name
                )));
            }
        }
        Ok(())
    }
}
