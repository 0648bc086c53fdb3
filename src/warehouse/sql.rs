//! SQL text generation for the star tables
//!
//! Identifiers come partly from configuration, so every one is checked against
//! a conservative pattern and double-quoted before it reaches a statement.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{WarehouseError, WarehouseResult};
use crate::schema::{DimensionSpec, StarSchema};

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().map_or(false, |pattern| pattern.is_match(name))
}

/// Double-quote a table or column name after validating it
pub fn quote_ident(name: &str) -> WarehouseResult<String> {
    if !is_valid_identifier(name) {
        return Err(WarehouseError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

pub fn create_dimension_table(dim: &DimensionSpec) -> WarehouseResult<String> {
    let mut columns = vec![
        format!("{} INTEGER PRIMARY KEY", quote_ident(&dim.surrogate_key)?),
        format!("{} TEXT NOT NULL UNIQUE", quote_ident(&dim.natural_key)?),
    ];
    for attribute in &dim.attributes {
        columns.push(format!(
            "{} {}",
            quote_ident(&attribute.name)?,
            attribute.column_type.sql_type()
        ));
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&dim.table)?,
        columns.join(", ")
    ))
}

pub fn create_fact_table(star: &StarSchema) -> WarehouseResult<String> {
    let fact = &star.fact;
    let mut columns = Vec::new();

    for name in &fact.dimensions {
        let dim = star
            .find_dimension(name)
            .ok_or_else(|| WarehouseError::InvalidIdentifier(name.clone()))?;
        let key = quote_ident(&dim.surrogate_key)?;
        columns.push(format!(
            "{key} INTEGER NOT NULL REFERENCES {}({key})",
            quote_ident(&dim.table)?
        ));
    }
    for column in &fact.columns {
        columns.push(format!(
            "{} {}",
            quote_ident(&column.name)?,
            column.column_type.sql_type()
        ));
    }
    for measure in &fact.measures {
        columns.push(format!("{} REAL", quote_ident(&measure.name)?));
    }
    if let Some(date) = &fact.date_column {
        columns.push(format!("{} TEXT", quote_ident(date)?));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&fact.table)?,
        columns.join(", ")
    ))
}

/// Parameterised insert with one `?` per column
pub fn insert_into(table: &str, columns: &[&str]) -> WarehouseResult<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<WarehouseResult<Vec<_>>>()?;
    let placeholders = vec!["?"; columns.len()].join(", ");
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote_ident(table)?,
        quoted.join(", ")
    ))
}

pub fn delete_all(table: &str) -> WarehouseResult<String> {
    Ok(format!("DELETE FROM {}", quote_ident(table)?))
}

pub fn count_rows(table: &str) -> WarehouseResult<String> {
    Ok(format!("SELECT COUNT(*) FROM {}", quote_ident(table)?))
}

pub fn select_all(table: &str) -> WarehouseResult<String> {
    Ok(format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, FactSpec};

    fn star() -> StarSchema {
        StarSchema::new(
            FactSpec::new("fact_transactions")
                .references("currency")
                .column(ColumnSpec::integer("user_id"))
                .measure("amount_eur")
                .dated("date"),
        )
        .dimension(
            DimensionSpec::new("currency", "dim_currency", "currency_key", "symbol")
                .attribute(ColumnSpec::float("rate_to_eur")),
        )
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("fact_sales"));
        assert!(is_valid_identifier("_tmp1"));
        assert!(!is_valid_identifier("1st"));
        assert!(!is_valid_identifier("fact\"; DROP TABLE x; --"));
        assert!(!is_valid_identifier(""));
        assert!(matches!(
            quote_ident("bad name"),
            Err(WarehouseError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_dimension_ddl() {
        let star = star();
        let sql = create_dimension_table(&star.dimensions[0]).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"dim_currency\" (\"currency_key\" INTEGER PRIMARY KEY, \
             \"symbol\" TEXT NOT NULL UNIQUE, \"rate_to_eur\" REAL)"
        );
    }

    #[test]
    fn test_fact_ddl_references_dimension() {
        let sql = create_fact_table(&star()).unwrap();
        assert!(sql.contains(
            "\"currency_key\" INTEGER NOT NULL REFERENCES \"dim_currency\"(\"currency_key\")"
        ));
        assert!(sql.contains("\"user_id\" INTEGER"));
        assert!(sql.contains("\"amount_eur\" REAL"));
        assert!(sql.ends_with("\"date\" TEXT)"));
    }

    #[test]
    fn test_insert_statement() {
        let sql = insert_into("dim_currency", &["currency_key", "symbol"]).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"dim_currency\" (\"currency_key\", \"symbol\") VALUES (?, ?)"
        );
    }
}
