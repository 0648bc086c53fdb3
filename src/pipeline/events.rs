//! Events: a JSON activity log loaded into an event-type star

use super::{PipelineEngine, PipelineKind, RunSummary};
use crate::config::Config;
use crate::errors::PipelineResult;
use crate::export::ReportQuery;
use crate::ingestor::JsonFileExtractor;
use crate::loader::DimensionalLoader;
use crate::models::ValueType;
use crate::schema::{
    date_of, ColumnSpec, ColumnType, DerivedColumn, DimensionSpec, FactSpec, SchemaSpec, StarSchema,
};
use crate::snapshot::write_snapshot;
use crate::validation::{Expectation, ExpectationSuite};
use crate::warehouse::Warehouse;

pub const SNAPSHOT_FILE: &str = "events.parquet";

pub fn schema() -> SchemaSpec {
    SchemaSpec::new("events")
        .column(ColumnSpec::integer("user_id"))
        .column(ColumnSpec::text("event").required())
        .column(ColumnSpec::timestamp("timestamp"))
        .derived(DerivedColumn::new("date", ColumnType::Date, &["timestamp"], date_of))
        .not_null(&["event"])
}

pub fn star() -> StarSchema {
    StarSchema::new(
        FactSpec::new("fact_events")
            .references("event")
            .column(ColumnSpec::integer("user_id"))
            .column(ColumnSpec::timestamp("timestamp"))
            .dated("date"),
    )
    .dimension(DimensionSpec::new("event", "dim_event", "event_key", "event"))
}

pub fn suites() -> Vec<ExpectationSuite> {
    vec![
        ExpectationSuite::new("dim_event")
            .expect(Expectation::not_null("event"))
            .expect(Expectation::unique("event")),
        ExpectationSuite::new("fact_events")
            .expect(Expectation::not_null("user_id"))
            .expect(Expectation::type_membership("user_id", &[ValueType::Integer]))
            .expect(Expectation::not_null("timestamp"))
            .expect(Expectation::references("event_key", "dim_event", "event_key")),
    ]
}

pub fn reports() -> PipelineResult<Vec<ReportQuery>> {
    Ok(vec![
        ReportQuery::table("fact_events", &["user_id", "timestamp", "date"])?,
        ReportQuery::new(
            "daily_events",
            "SELECT f.date, d.event, COUNT(*) AS events \
             FROM fact_events f JOIN dim_event d ON d.event_key = f.event_key \
             GROUP BY f.date, d.event ORDER BY f.date, d.event",
        ),
    ])
}

pub async fn run(config: &Config, warehouse: &Warehouse) -> PipelineResult<RunSummary> {
    let settings = &config.events;
    let engine = PipelineEngine::new(PipelineKind::Events, config, settings.max_retries);

    let raw = engine
        .extract(&JsonFileExtractor::new(&settings.events_file))
        .await?;
    let batch = engine.transform(&raw, &schema()).await?;

    let path = settings.silver_dir.join(SNAPSHOT_FILE);
    let snapshot = engine.snapshot(|| write_snapshot(&path, &batch)).await?;

    let loader = DimensionalLoader::new(star())?;
    let counts = engine.load(&loader, &batch, warehouse).await?;
    Ok(engine.finish(raw.len(), Some(snapshot), counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;
    use crate::models::Value;
    use crate::validation::ValidationGate;

    #[tokio::test]
    async fn test_events_run_derives_date_and_passes_gate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.events.events_file = dir.path().join("events.json");
        config.events.silver_dir = dir.path().join("silver");
        config.events.warehouse = WarehouseConfig::new(format!(
            "sqlite://{}",
            dir.path().join("events.db").display()
        ));
        std::fs::write(
            &config.events.events_file,
            r#"[
                {"user_id": 1, "event": "login", "timestamp": "2025-08-13T09:00:00Z"},
                {"user_id": 1, "event": "purchase", "timestamp": "2025-08-13T09:05:00Z"},
                {"user_id": 2, "event": "login", "timestamp": "2025-08-14 10:00:00"}
            ]"#,
        )
        .unwrap();
        let warehouse = Warehouse::connect(&config.events.warehouse).await.unwrap();

        let summary = run(&config, &warehouse).await.unwrap();
        let counts = summary.counts.unwrap();
        assert_eq!(counts.fact_count, 3);
        assert_eq!(counts.dim_count, 2);
        assert!(dir.path().join("silver").join(SNAPSHOT_FILE).exists());

        let facts = warehouse.read_table("fact_events").await.unwrap();
        assert_eq!(
            facts.column("date").unwrap()[2],
            &Value::from("2025-08-14")
        );

        let report = ValidationGate::new(warehouse).run(&suites()).await.unwrap();
        assert!(report.success(), "{report}");
    }

    #[tokio::test]
    async fn test_null_event_fails_in_transform_before_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.events.events_file = dir.path().join("events.json");
        config.events.silver_dir = dir.path().join("silver");
        config.events.warehouse = WarehouseConfig::new(format!(
            "sqlite://{}",
            dir.path().join("events.db").display()
        ));
        std::fs::write(
            &config.events.events_file,
            r#"[
                {"user_id": 1, "event": "login", "timestamp": "2025-08-13T09:00:00Z"},
                {"user_id": 2, "event": null, "timestamp": "2025-08-13T09:05:00Z"}
            ]"#,
        )
        .unwrap();
        let warehouse = Warehouse::connect(&config.events.warehouse).await.unwrap();

        let err = run(&config, &warehouse).await.unwrap_err();
        assert_eq!(err.stage(), "transform");
        assert!(!dir.path().join("silver").join(SNAPSHOT_FILE).exists());
        assert!(!warehouse.table_exists("fact_events").await.unwrap());
    }
}
