//! Dimensional loader: idempotent full-replace loads of a star schema
//!
//! Loading happens in two steps. [`DimensionalLoader::plan`] is pure: it derives
//! the distinct natural keys of every dimension, assigns surrogate keys and
//! resolves every fact row against them. [`DimensionalLoader::apply`] writes a
//! plan inside a single transaction, replacing the previous contents of every
//! table of the star. Either the whole plan is committed or nothing is.
//!
//! Concurrent loaders against the same warehouse are not supported.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{LoadError, LoadResult};
use crate::models::{DimensionRow, FactRow, NormalizedRecordBatch, Record, Value, DATE_FORMAT};
use crate::schema::{DimensionSpec, StarSchema};
use crate::warehouse::{bind_value, sql, Warehouse};

pub mod surrogate;

pub use surrogate::{SurrogateKeyMap, SURROGATE_KEY_START};

/// Rows of one dimension table
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionPlan {
    /// Dimension name as declared in the star
    pub dimension: String,
    pub rows: Vec<DimensionRow>,
}

/// Everything a load writes, computed before touching the warehouse
#[derive(Debug, Clone, PartialEq)]
pub struct LoadPlan {
    pub dimensions: Vec<DimensionPlan>,
    pub facts: Vec<FactRow>,
}

/// Row counts observed inside the load transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadCounts {
    pub fact_count: i64,
    /// Sum over every dimension table of the star
    pub dim_count: i64,
    pub tables: BTreeMap<String, i64>,
}

#[derive(Debug, Clone)]
pub struct DimensionalLoader {
    star: StarSchema,
}

impl DimensionalLoader {
    pub fn new(star: StarSchema) -> LoadResult<Self> {
        star.validate()?;
        Ok(Self { star })
    }

    pub fn star(&self) -> &StarSchema {
        &self.star
    }

    /// Plan and apply in one go
    pub async fn load(
        &self,
        batch: &NormalizedRecordBatch,
        warehouse: &Warehouse,
    ) -> LoadResult<LoadCounts> {
        let plan = self.plan(batch)?;
        self.apply(&plan, warehouse).await
    }

    /// Compute dimension and fact rows for `batch`
    ///
    /// Fails with [`LoadError::UnresolvedForeignKey`] when a record has no
    /// natural key for a dimension the fact references.
    pub fn plan(&self, batch: &NormalizedRecordBatch) -> LoadResult<LoadPlan> {
        let records = batch.records();
        let mut key_maps = BTreeMap::new();
        let mut dimensions = Vec::with_capacity(self.star.dimensions.len());

        for dim in &self.star.dimensions {
            if !records.is_empty() && !batch.has_column(&dim.source_column) {
                return Err(LoadError::InvalidStar(format!(
                    "batch {} has no column {} for dimension {}",
                    batch.schema_name(),
                    dim.source_column,
                    dim.name
                )));
            }

            let mut first_seen: BTreeMap<String, &Record> = BTreeMap::new();
            for (row, record) in records.iter().enumerate() {
                let natural_key = natural_key_of(dim, record, row)?;
                first_seen.entry(natural_key).or_insert(record);
            }

            let keys = SurrogateKeyMap::assign(first_seen.keys().cloned());
            let rows = keys
                .iter()
                .map(|(natural_key, surrogate_key)| {
                    let source = first_seen.get(natural_key);
                    let attributes = dim
                        .attributes
                        .iter()
                        .map(|attr| {
                            let value = source
                                .and_then(|r| r.get(&attr.name))
                                .cloned()
                                .unwrap_or(Value::Null);
                            (attr.name.clone(), value)
                        })
                        .collect();
                    DimensionRow {
                        natural_key: natural_key.to_string(),
                        surrogate_key,
                        attributes,
                    }
                })
                .collect();

            dimensions.push(DimensionPlan {
                dimension: dim.name.clone(),
                rows,
            });
            key_maps.insert(dim.name.as_str(), (dim, keys));
        }

        let fact = &self.star.fact;
        let mut facts = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            let mut foreign_keys = BTreeMap::new();
            for name in &fact.dimensions {
                let Some((dim, keys)) = key_maps.get(name.as_str()) else {
                    return Err(LoadError::InvalidStar(format!("unknown dimension {name}")));
                };
                let natural_key = natural_key_of(dim, record, row)?;
                let surrogate = keys.get(&natural_key).ok_or_else(|| {
                    LoadError::UnresolvedForeignKey {
                        dimension: name.clone(),
                        natural_key: Some(natural_key.clone()),
                        row,
                    }
                })?;
                foreign_keys.insert(name.clone(), surrogate);
            }

            let measures = fact
                .measures
                .iter()
                .filter_map(|m| {
                    record
                        .get(&m.name)
                        .and_then(Value::as_f64)
                        .map(|v| (m.name.clone(), v))
                })
                .collect();

            let attributes = fact
                .columns
                .iter()
                .map(|c| (c.name.clone(), record.get(&c.name).cloned().unwrap_or(Value::Null)))
                .collect();

            let date = fact
                .date_column
                .as_ref()
                .and_then(|c| record.get(c))
                .and_then(Value::as_date);

            facts.push(FactRow {
                foreign_keys,
                measures,
                attributes,
                date,
            });
        }

        debug!(
            fact_table = %fact.table,
            facts = facts.len(),
            dimensions = dimensions.len(),
            "load planned"
        );
        Ok(LoadPlan { dimensions, facts })
    }

    /// Replace the star's contents with `plan` in one transaction
    pub async fn apply(&self, plan: &LoadPlan, warehouse: &Warehouse) -> LoadResult<LoadCounts> {
        let fact = &self.star.fact;
        let mut tx = warehouse.pool().begin().await?;

        for dim in &self.star.dimensions {
            sqlx::query(&sql::create_dimension_table(dim)?)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(&sql::create_fact_table(&self.star)?)
            .execute(&mut *tx)
            .await?;

        // facts go first so their references never dangle
        sqlx::query(&sql::delete_all(&fact.table)?)
            .execute(&mut *tx)
            .await?;
        for dim in &self.star.dimensions {
            sqlx::query(&sql::delete_all(&dim.table)?)
                .execute(&mut *tx)
                .await?;
        }

        let mut inserted: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
        for dim_plan in &plan.dimensions {
            let dim = self.dimension(&dim_plan.dimension)?;
            let mut columns = vec![dim.surrogate_key.as_str(), dim.natural_key.as_str()];
            columns.extend(dim.attributes.iter().map(|a| a.name.as_str()));
            let statement = sql::insert_into(&dim.table, &columns)?;

            let keys = inserted.entry(dim.name.as_str()).or_default();
            for row in &dim_plan.rows {
                let mut query = sqlx::query(&statement)
                    .bind(row.surrogate_key)
                    .bind(row.natural_key.clone());
                for attr in &dim.attributes {
                    query = bind_value(query, row.attributes.get(&attr.name).unwrap_or(&Value::Null));
                }
                query.execute(&mut *tx).await?;
                keys.insert(row.surrogate_key);
            }
        }

        for (row, fact_row) in plan.facts.iter().enumerate() {
            for name in &fact.dimensions {
                let resolved = fact_row
                    .foreign_keys
                    .get(name)
                    .is_some_and(|key| inserted.get(name.as_str()).is_some_and(|keys| keys.contains(key)));
                if !resolved {
                    return Err(LoadError::UnresolvedForeignKey {
                        dimension: name.clone(),
                        natural_key: None,
                        row,
                    });
                }
            }
        }

        let mut columns = Vec::new();
        for name in &fact.dimensions {
            columns.push(self.dimension(name)?.surrogate_key.as_str());
        }
        columns.extend(fact.columns.iter().map(|c| c.name.as_str()));
        columns.extend(fact.measures.iter().map(|m| m.name.as_str()));
        if let Some(date) = &fact.date_column {
            columns.push(date.as_str());
        }
        let statement = sql::insert_into(&fact.table, &columns)?;

        for fact_row in &plan.facts {
            let mut query = sqlx::query(&statement);
            for name in &fact.dimensions {
                query = query.bind(fact_row.foreign_keys.get(name).copied());
            }
            for column in &fact.columns {
                query = bind_value(query, fact_row.attributes.get(&column.name).unwrap_or(&Value::Null));
            }
            for measure in &fact.measures {
                query = query.bind(fact_row.measures.get(&measure.name).copied());
            }
            if fact.date_column.is_some() {
                query = query.bind(fact_row.date.map(|d| d.format(DATE_FORMAT).to_string()));
            }
            query.execute(&mut *tx).await?;
        }

        let mut counts = LoadCounts::default();
        let fact_count: i64 = sqlx::query_scalar(&sql::count_rows(&fact.table)?)
            .fetch_one(&mut *tx)
            .await?;
        counts.fact_count = fact_count;
        counts.tables.insert(fact.table.clone(), fact_count);
        for dim in &self.star.dimensions {
            let count: i64 = sqlx::query_scalar(&sql::count_rows(&dim.table)?)
                .fetch_one(&mut *tx)
                .await?;
            counts.dim_count += count;
            counts.tables.insert(dim.table.clone(), count);
        }

        tx.commit().await?;

        info!(
            fact_table = %fact.table,
            fact_count = counts.fact_count,
            dim_count = counts.dim_count,
            "dimensional load committed"
        );
        Ok(counts)
    }

    fn dimension(&self, name: &str) -> LoadResult<&DimensionSpec> {
        self.star
            .find_dimension(name)
            .ok_or_else(|| LoadError::InvalidStar(format!("unknown dimension {name}")))
    }
}

/// Rendered natural key of a record for a dimension; null keys cannot be resolved
fn natural_key_of(dim: &DimensionSpec, record: &Record, row: usize) -> LoadResult<String> {
    match record.get(&dim.source_column) {
        Some(value) if !value.is_null() => Ok(value.to_string()),
        _ => Err(LoadError::UnresolvedForeignKey {
            dimension: dim.name.clone(),
            natural_key: None,
            row,
        }),
    }
}
