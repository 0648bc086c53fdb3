//! Sales: a folder of CSV exports loaded into a product star

use chrono::Utc;

use super::{PipelineEngine, PipelineKind, RunSummary};
use crate::config::Config;
use crate::errors::PipelineResult;
use crate::export::ReportQuery;
use crate::ingestor::CsvFolderExtractor;
use crate::loader::DimensionalLoader;
use crate::schema::{
    product, ColumnSpec, ColumnType, DerivedColumn, DimensionSpec, FactSpec, SchemaSpec, StarSchema,
};
use crate::snapshot::write_snapshot;
use crate::validation::{Expectation, ExpectationSuite, RangeBound};
use crate::warehouse::Warehouse;

pub fn schema() -> SchemaSpec {
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

pub fn star(config: &Config) -> StarSchema {
    StarSchema::new(
        FactSpec::new(config.sales.fact_table.clone())
            .references("product")
            .column(ColumnSpec::text("order_id"))
            .measure("quantity")
            .measure("price")
            .measure("revenue")
            .dated("order_date"),
    )
    .dimension(DimensionSpec::new("product", "dim_product", "product_key", "product_id"))
}

pub fn suites(config: &Config) -> Vec<ExpectationSuite> {
    vec![
        ExpectationSuite::new("dim_product")
            .expect(Expectation::not_null("product_id"))
            .expect(Expectation::unique("product_id")),
        ExpectationSuite::new(&config.sales.fact_table)
            .expect(Expectation::not_null("product_key"))
            .expect(Expectation::at_least("quantity", RangeBound::Number(0.0)))
            .expect(Expectation::at_least("price", RangeBound::Number(0.0)))
            .expect(Expectation::references("product_key", "dim_product", "product_key")),
    ]
}

pub fn reports(config: &Config) -> PipelineResult<Vec<ReportQuery>> {
    let fact = &config.sales.fact_table;
    Ok(vec![
        ReportQuery::table(fact, &[])?,
        ReportQuery::table("dim_product", &[])?,
        ReportQuery::new(
            "revenue_by_product",
            &format!(
                "SELECT d.product_id, ROUND(SUM(f.revenue), 2) AS revenue \
                 FROM \"{fact}\" f JOIN dim_product d ON d.product_key = f.product_key \
                 GROUP BY d.product_id ORDER BY d.product_id"
            ),
        ),
    ])
}

/// Snapshot file name for a run started now
pub fn snapshot_name() -> String {
    format!("silver_{}.parquet", Utc::now().format("%Y%m%d_%H%M%S"))
}

pub async fn run(config: &Config, warehouse: &Warehouse) -> PipelineResult<RunSummary> {
    let engine = PipelineEngine::new(PipelineKind::Sales, config, config.sales.max_retries);

    let raw = engine
        .extract(&CsvFolderExtractor::new(&config.sales.raw_dir))
        .await?;
    if raw.is_empty() {
        return Ok(engine.skipped(0));
    }

    let batch = engine.transform(&raw, &schema()).await?;

    let path = config.sales.silver_dir.join(snapshot_name());
    let snapshot = engine.snapshot(|| write_snapshot(&path, &batch)).await?;

    let loader = DimensionalLoader::new(star(config))?;
    let counts = engine.load(&loader, &batch, warehouse).await?;
    Ok(engine.finish(raw.len(), Some(snapshot), counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.sales.raw_dir = dir.join("raw");
        config.sales.silver_dir = dir.join("silver");
        config.sales.warehouse = WarehouseConfig::new(format!(
            "sqlite://{}",
            dir.join("sales.db").display()
        ));
        config
    }

    #[test]
    fn test_star_is_valid_with_configured_fact_table() {
        let mut config = Config::default();
        config.sales.fact_table = "fact_orders".to_string();
        assert!(DimensionalLoader::new(star(&config)).is_ok());
        assert_eq!(suites(&config)[1].table, "fact_orders");
    }

    #[test]
    fn test_snapshot_name_layout() {
        let name = snapshot_name();
        assert!(name.starts_with("silver_"));
        assert!(name.ends_with(".parquet"));
        assert_eq!(name.len(), "silver_20250813_091500.parquet".len());
    }

    #[tokio::test]
    async fn test_empty_folder_skips_without_touching_warehouse() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.sales.raw_dir).unwrap();
        let warehouse = Warehouse::connect(&config.sales.warehouse).await.unwrap();

        let summary = run(&config, &warehouse).await.unwrap();
        assert!(summary.skipped);
        assert!(summary.counts.is_none());
        assert!(!warehouse.table_exists("fact_sales").await.unwrap());
    }

    #[tokio::test]
    async fn test_sales_run_loads_star_and_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.sales.raw_dir).unwrap();
        std::fs::write(
            config.sales.raw_dir.join("2025-08-12.csv"),
            "order_id,product_id,order_date,quantity,price\n1,P2,2025-08-12,2,5\n2,P1,2025-08-12,,3\n",
        )
        .unwrap();
        std::fs::write(
            config.sales.raw_dir.join("2025-08-13.csv"),
            "order_id,product_id,order_date,quantity,price\n3,P1,2025-08-13,1,3\n",
        )
        .unwrap();
        let warehouse = Warehouse::connect(&config.sales.warehouse).await.unwrap();

        let summary = run(&config, &warehouse).await.unwrap();
        let counts = summary.counts.unwrap();
        assert_eq!(summary.rows_extracted, 3);
        assert_eq!(counts.fact_count, 3);
        assert_eq!(counts.dim_count, 2);
        assert!(summary.snapshot.unwrap().exists());

        let dim = warehouse.read_table("dim_product").await.unwrap();
        assert_eq!(
            dim.column("product_id").unwrap(),
            vec![&crate::models::Value::from("P1"), &crate::models::Value::from("P2")]
        );
    }
}
