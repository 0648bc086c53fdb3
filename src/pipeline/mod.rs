//! Pipeline engine and the concrete pipeline declarations
//!
//! A pipeline is a declaration (schema, star, expectation suites, reports and
//! the choice of extractor) executed by [`PipelineEngine`], which routes every
//! stage through the task runner so each attempt is logged and extraction
//! failures are retried.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{duration_serde, Config, WarehouseConfig};
use crate::errors::{PipelineError, PipelineResult, SnapshotError};
use crate::export::{export_reports, ReportQuery};
use crate::ingestor::{Extractor, RatesSource};
use crate::loader::{DimensionalLoader, LoadCounts};
use crate::models::{NormalizedRecordBatch, RatesPayload, RawRecordBatch};
use crate::runner::TaskRunner;
use crate::schema::SchemaSpec;
use crate::transform::{CurrencyConversion, RateTable, Transformer};
use crate::validation::{ExpectationSuite, GateReport, ValidationGate};
use crate::warehouse::Warehouse;

pub mod events;
pub mod rates;
pub mod sales;
pub mod transactions;

/// The pipelines this crate ships
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PipelineKind {
    Sales,
    Rates,
    Transactions,
    Events,
}

impl PipelineKind {
    pub fn warehouse(self, config: &Config) -> &WarehouseConfig {
        match self {
            PipelineKind::Sales => &config.sales.warehouse,
            PipelineKind::Rates => &config.rates.warehouse,
            PipelineKind::Transactions => &config.transactions.warehouse,
            PipelineKind::Events => &config.events.warehouse,
        }
    }

    pub fn warehouse_mut(self, config: &mut Config) -> &mut WarehouseConfig {
        match self {
            PipelineKind::Sales => &mut config.sales.warehouse,
            PipelineKind::Rates => &mut config.rates.warehouse,
            PipelineKind::Transactions => &mut config.transactions.warehouse,
            PipelineKind::Events => &mut config.events.warehouse,
        }
    }

    /// Expectation suites run by the validation gate after a load
    pub fn suites(self, config: &Config) -> Vec<ExpectationSuite> {
        match self {
            PipelineKind::Sales => sales::suites(config),
            PipelineKind::Rates => rates::suites(),
            PipelineKind::Transactions => transactions::suites(config),
            PipelineKind::Events => events::suites(),
        }
    }

    pub fn reports(self, config: &Config) -> PipelineResult<Vec<ReportQuery>> {
        match self {
            PipelineKind::Sales => sales::reports(config),
            PipelineKind::Rates => rates::reports(),
            PipelineKind::Transactions => transactions::reports(),
            PipelineKind::Events => events::reports(),
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub pipeline: PipelineKind,
    pub run_id: Uuid,
    pub rows_extracted: usize,
    /// Absent when the run ended before loading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<LoadCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
    /// The run found nothing to load and left the warehouse untouched
    pub skipped: bool,
    #[serde(with = "duration_serde::duration")]
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(pipeline: PipelineKind, run_id: Uuid) -> Self {
        Self {
            pipeline,
            run_id,
            rows_extracted: 0,
            counts: None,
            snapshot: None,
            skipped: false,
            elapsed: Duration::ZERO,
        }
    }
}

/// Executes pipeline stages through the task runner
pub struct PipelineEngine {
    kind: PipelineKind,
    run_id: Uuid,
    runner: TaskRunner,
    transformer: Transformer,
    started: Instant,
}

impl PipelineEngine {
    /// Engine for one run of `kind`; extraction is retried `max_retries` times
    pub fn new(kind: PipelineKind, config: &Config, max_retries: u32) -> Self {
        let run_id = Uuid::new_v4();
        info!(pipeline = %kind, run_id = %run_id, "pipeline run started");
        Self {
            kind,
            run_id,
            runner: TaskRunner::new(config.runner.clone()).with_max_retries(max_retries),
            transformer: Transformer::new(config.transform.coercion),
            started: Instant::now(),
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub async fn extract(&self, extractor: &dyn Extractor) -> PipelineResult<RawRecordBatch> {
        let batch = self
            .runner
            .run("extract", move |()| extractor.extract(), ())
            .await?;
        Ok(batch)
    }

    pub async fn fetch_rates(&self, source: &dyn RatesSource) -> PipelineResult<RatesPayload> {
        let payload = self
            .runner
            .run("extract", move |()| source.fetch(), ())
            .await?;
        Ok(payload)
    }

    /// Run a synchronous stage; only extraction errors are ever retried
    pub async fn stage<T, F>(&self, stage: &str, f: F) -> PipelineResult<T>
    where
        F: Fn() -> PipelineResult<T>,
    {
        self.runner
            .run(stage, |()| std::future::ready(f()), ())
            .await
    }

    pub async fn transform(
        &self,
        raw: &RawRecordBatch,
        schema: &SchemaSpec,
    ) -> PipelineResult<NormalizedRecordBatch> {
        self.stage("transform", || Ok(self.transformer.transform(raw, schema)?))
            .await
    }

    pub async fn transform_monetary(
        &self,
        raw: &RawRecordBatch,
        schema: &SchemaSpec,
        rates: &RateTable,
        conversion: &CurrencyConversion,
    ) -> PipelineResult<NormalizedRecordBatch> {
        self.stage("transform", || {
            Ok(self
                .transformer
                .transform_monetary(raw, schema, rates, conversion)?)
        })
        .await
    }

    pub async fn snapshot<F>(&self, write: F) -> PipelineResult<PathBuf>
    where
        F: Fn() -> Result<PathBuf, SnapshotError>,
    {
        self.stage("snapshot", || Ok(write()?)).await
    }

    pub async fn load(
        &self,
        loader: &DimensionalLoader,
        batch: &NormalizedRecordBatch,
        warehouse: &Warehouse,
    ) -> PipelineResult<LoadCounts> {
        self.runner
            .run(
                "load",
                move |()| async move {
                    loader.load(batch, warehouse).await.map_err(PipelineError::from)
                },
                (),
            )
            .await
    }

    /// Summary of a run that found nothing to load
    pub fn skipped(&self, rows_extracted: usize) -> RunSummary {
        let mut summary = RunSummary::new(self.kind, self.run_id);
        summary.rows_extracted = rows_extracted;
        summary.skipped = true;
        summary.elapsed = self.started.elapsed();
        warn!(pipeline = %self.kind, run_id = %self.run_id, "nothing to load, run skipped");
        summary
    }

    pub fn finish(
        &self,
        rows_extracted: usize,
        snapshot: Option<PathBuf>,
        counts: LoadCounts,
    ) -> RunSummary {
        let mut summary = RunSummary::new(self.kind, self.run_id);
        summary.rows_extracted = rows_extracted;
        summary.snapshot = snapshot;
        summary.counts = Some(counts);
        summary.elapsed = self.started.elapsed();
        info!(
            pipeline = %self.kind,
            run_id = %self.run_id,
            rows = rows_extracted,
            fact_count = summary.counts.as_ref().map_or(0, |c| c.fact_count),
            dim_count = summary.counts.as_ref().map_or(0, |c| c.dim_count),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "pipeline run finished"
        );
        summary
    }
}

/// Execute one pipeline against its configured warehouse
pub async fn run(kind: PipelineKind, config: &Config) -> PipelineResult<RunSummary> {
    let warehouse = Warehouse::connect(kind.warehouse(config)).await?;
    let summary = run_with(kind, config, &warehouse).await;
    warehouse.close().await;
    summary
}

/// Execute one pipeline against an already open warehouse
pub async fn run_with(
    kind: PipelineKind,
    config: &Config,
    warehouse: &Warehouse,
) -> PipelineResult<RunSummary> {
    match kind {
        PipelineKind::Sales => sales::run(config, warehouse).await,
        PipelineKind::Rates => rates::run(config, warehouse).await,
        PipelineKind::Transactions => transactions::run(config, warehouse).await,
        PipelineKind::Events => events::run(config, warehouse).await,
    }
}

/// Run the validation gate of one pipeline over its persisted tables
pub async fn validate(kind: PipelineKind, config: &Config) -> PipelineResult<GateReport> {
    let warehouse = Warehouse::connect(kind.warehouse(config)).await?;
    let report = ValidationGate::new(warehouse.clone())
        .run(&kind.suites(config))
        .await;
    warehouse.close().await;
    Ok(report?)
}

/// Export the tables and reports of one pipeline as CSV files
pub async fn export(kind: PipelineKind, config: &Config) -> PipelineResult<Vec<PathBuf>> {
    let reports = kind.reports(config)?;
    let warehouse = Warehouse::connect(kind.warehouse(config)).await?;
    let written = export_reports(&warehouse, &reports, &config.export.out_dir).await;
    warehouse.close().await;
    Ok(written?)
}
