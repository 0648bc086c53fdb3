//! Warehouse handle: a SQLite database reached through `sqlx`
//!
//! The warehouse is an ordinary SQL datastore. This module owns connecting,
//! creating the star tables and reading persisted tables back as snapshots
//! for the validation gate and the exporters.

use std::path::PathBuf;
use std::str::FromStr;

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Sqlite, SqlitePool, Statement, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::config::WarehouseConfig;
use crate::errors::{WarehouseError, WarehouseResult};
use crate::models::{Record, Value, DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::schema::StarSchema;

pub mod sql;

pub use sql::{is_valid_identifier, quote_ident};

/// Connection to one warehouse; cheap to clone
#[derive(Debug, Clone)]
pub struct Warehouse {
    pool: SqlitePool,
    url: String,
}

/// A table as persisted, with column names in storage order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSnapshot {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableSnapshot {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column; `None` when the column does not exist
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().filter_map(|row| row.get(index)).collect())
    }

    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Bind a cell to the next placeholder; dates are bound as ISO text
pub(crate) fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Integer(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Date(d) => query.bind(d.format(DATE_FORMAT).to_string()),
        Value::Timestamp(ts) => query.bind(ts.format(TIMESTAMP_FORMAT).to_string()),
    }
}

/// Filesystem location behind a SQLite URL, if it has one
fn database_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" || path.starts_with("file::memory:") {
        return None;
    }
    Some(PathBuf::from(path))
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

impl Warehouse {
    /// Open (and create on first use) the warehouse at `config.url`
    pub async fn connect(config: &WarehouseConfig) -> WarehouseResult<Self> {
        if let Some(parent) = database_path(&config.url).and_then(|p| p.parent().map(PathBuf::from)) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(&parent).map_err(|source| WarehouseError::Prepare {
                    path: parent.clone(),
                    source,
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // every in-memory connection is its own database
        let max_connections = if is_memory_url(&config.url) {
            1
        } else {
            config.max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        debug!(url = %config.url, max_connections, "warehouse connected");
        Ok(Self {
            pool,
            url: config.url.clone(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Create the dimension and fact tables of `star` if they are absent
    pub async fn ensure_star_schema(&self, star: &StarSchema) -> WarehouseResult<()> {
        let mut tx = self.pool.begin().await?;
        for dim in &star.dimensions {
            sqlx::query(&sql::create_dimension_table(dim)?)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(&sql::create_fact_table(star)?)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(fact_table = %star.fact.table, "star schema ensured");
        Ok(())
    }

    pub async fn table_exists(&self, table: &str) -> WarehouseResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    pub async fn count_rows(&self, table: &str) -> WarehouseResult<i64> {
        if !self.table_exists(table).await? {
            return Err(WarehouseError::MissingTable(table.to_string()));
        }
        let count: i64 = sqlx::query_scalar(&sql::count_rows(table)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Read a whole persisted table
    pub async fn read_table(&self, table: &str) -> WarehouseResult<TableSnapshot> {
        if !self.table_exists(table).await? {
            return Err(WarehouseError::MissingTable(table.to_string()));
        }
        let mut snapshot = self.fetch(&sql::select_all(table)?).await?;
        snapshot.table = table.to_string();
        Ok(snapshot)
    }

    /// Run a read-only query and materialize its result
    pub async fn fetch(&self, query: &str) -> WarehouseResult<TableSnapshot> {
        let statement = (&self.pool).prepare(query).await?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        let rows = rows
            .iter()
            .map(|row| decode_row(row, columns.len()))
            .collect::<WarehouseResult<Vec<_>>>()?;

        debug!(rows = rows.len(), columns = columns.len(), "query materialized");
        Ok(TableSnapshot {
            table: String::new(),
            columns,
            rows,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Decode by the storage class of each stored value
fn decode_row(row: &SqliteRow, width: usize) -> WarehouseResult<Vec<Value>> {
    let mut values = Vec::with_capacity(width);
    for index in 0..width {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "INTEGER" => Value::Integer(row.try_get::<i64, _>(index)?),
            "REAL" => Value::Float(row.try_get::<f64, _>(index)?),
            "BLOB" => {
                let bytes = row.try_get::<Vec<u8>, _>(index)?;
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => Value::Text(row.try_get::<String, _>(index)?),
        };
        values.push(value);
    }
    Ok(values)
}
