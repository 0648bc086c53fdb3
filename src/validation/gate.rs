//! Validation gate over persisted warehouse tables

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{validate_with_references, Expectation, ExpectationResult, FailedExpectation, ReferenceValues};
use crate::errors::{WarehouseError, WarehouseResult};
use crate::warehouse::Warehouse;

/// Expectations declared for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationSuite {
    pub table: String,
    pub expectations: Vec<Expectation>,
}

impl ExpectationSuite {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            expectations: Vec::new(),
        }
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expectations.push(expectation);
        self
    }
}

/// Results of one gate run, one entry per suite
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateReport {
    pub results: Vec<ExpectationResult>,
}

impl GateReport {
    /// The gate passes only when every table passes
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failure_count(&self) -> usize {
        self.results.iter().map(|r| r.failures.len()).sum()
    }

    pub fn result(&self, table: &str) -> Option<&ExpectationResult> {
        self.results.iter().find(|r| r.table_name == table)
    }
}

impl fmt::Display for GateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            let status = if result.success { "PASS" } else { "FAIL" };
            writeln!(f, "{status} {}", result.table_name)?;
            for failure in &result.failures {
                writeln!(
                    f,
                    "  - {}({}): {}",
                    failure.expectation_kind, failure.column, failure.detail
                )?;
            }
        }
        write!(
            f,
            "{}",
            if self.success() {
                "validation gate passed"
            } else {
                "validation gate failed"
            }
        )
    }
}

/// Runs expectation suites against tables read back from a warehouse
pub struct ValidationGate {
    warehouse: Warehouse,
}

impl ValidationGate {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    /// Evaluate every suite; expectation failures land in the report
    ///
    /// A table that does not exist is reported as a failed `table_exists`
    /// check. Only warehouse access failures surface as errors.
    pub async fn run(&self, suites: &[ExpectationSuite]) -> WarehouseResult<GateReport> {
        let mut report = GateReport::default();

        for suite in suites {
            let snapshot = match self.warehouse.read_table(&suite.table).await {
                Ok(snapshot) => snapshot,
                Err(WarehouseError::MissingTable(table)) => {
                    warn!(table = %table, "FAIL table not found");
                    report.results.push(ExpectationResult {
                        table_name: table.clone(),
                        success: false,
                        failures: vec![FailedExpectation {
                            expectation_kind: "table_exists".to_string(),
                            column: String::new(),
                            detail: format!("table {table} not found"),
                        }],
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let references = self.references_for(suite).await?;
            let result = validate_with_references(
                &suite.table,
                &snapshot.records(),
                &suite.expectations,
                &references,
            );

            if result.success {
                info!(
                    table = %suite.table,
                    rows = snapshot.len(),
                    expectations = suite.expectations.len(),
                    "PASS"
                );
            } else {
                for failure in &result.failures {
                    warn!(
                        table = %suite.table,
                        kind = %failure.expectation_kind,
                        column = %failure.column,
                        detail = %failure.detail,
                        "FAIL"
                    );
                }
            }
            report.results.push(result);
        }

        Ok(report)
    }

    /// Key values of every table a suite refers to; absent tables are left out
    async fn references_for(&self, suite: &ExpectationSuite) -> WarehouseResult<ReferenceValues> {
        let mut references = ReferenceValues::new();
        for expectation in &suite.expectations {
            let Expectation::Referential {
                table, key_column, ..
            } = expectation
            else {
                continue;
            };
            let slot = (table.clone(), key_column.clone());
            if references.contains_key(&slot) {
                continue;
            }
            let snapshot = match self.warehouse.read_table(table).await {
                Ok(snapshot) => snapshot,
                Err(WarehouseError::MissingTable(_)) => continue,
                Err(e) => return Err(e),
            };
            if let Some(values) = snapshot.column(key_column) {
                let keys: BTreeSet<String> = values
                    .into_iter()
                    .filter(|v| !v.is_null())
                    .map(ToString::to_string)
                    .collect();
                references.insert(slot, keys);
            }
        }
        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;
    use crate::validation::RangeBound;

    async fn temp_warehouse() -> (tempfile::TempDir, Warehouse) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("warehouse.db").display());
        let warehouse = Warehouse::connect(&WarehouseConfig::new(url)).await.unwrap();
        (dir, warehouse)
    }

    async fn seed(warehouse: &Warehouse) {
        for statement in [
            "CREATE TABLE dim_currency (currency_key INTEGER PRIMARY KEY, symbol TEXT NOT NULL, rate_to_eur REAL)",
            "CREATE TABLE fact_transactions (currency_key INTEGER NOT NULL, user_id INTEGER, amount_eur REAL, date TEXT)",
            "INSERT INTO dim_currency VALUES (0, 'EUR', 1.0), (1, 'USD', 0.909)",
            "INSERT INTO fact_transactions VALUES (1, 1, 9.09, '2025-08-12'), (0, 2, 5.0, '2025-08-12')",
        ] {
            sqlx::query(statement)
                .execute(warehouse.pool())
                .await
                .unwrap();
        }
    }

    fn suites() -> Vec<ExpectationSuite> {
        vec![
            ExpectationSuite::new("dim_currency")
                .expect(Expectation::not_null("symbol"))
                .expect(Expectation::unique("symbol"))
                .expect(Expectation::greater_than("rate_to_eur", RangeBound::Number(0.0))),
            ExpectationSuite::new("fact_transactions")
                .expect(Expectation::not_null("amount_eur"))
                .expect(Expectation::at_least("amount_eur", RangeBound::Number(0.0)))
                .expect(Expectation::references("currency_key", "dim_currency", "currency_key")),
        ]
    }

    #[tokio::test]
    async fn test_gate_passes_on_consistent_tables() {
        let (_dir, warehouse) = temp_warehouse().await;
        seed(&warehouse).await;

        let report = ValidationGate::new(warehouse).run(&suites()).await.unwrap();
        assert!(report.success(), "{report}");
        assert_eq!(report.results.len(), 2);
        assert!(report.to_string().contains("PASS fact_transactions"));
    }

    #[tokio::test]
    async fn test_gate_reports_duplicate_natural_key() {
        let (_dir, warehouse) = temp_warehouse().await;
        seed(&warehouse).await;
        sqlx::query("INSERT INTO dim_currency VALUES (2, 'USD', 0.91)")
            .execute(warehouse.pool())
            .await
            .unwrap();

        let report = ValidationGate::new(warehouse).run(&suites()).await.unwrap();
        assert!(!report.success());
        let dim = report.result("dim_currency").unwrap();
        assert_eq!(dim.failures.len(), 1);
        assert_eq!(dim.failures[0].expectation_kind, "uniqueness");
        assert!(report.result("fact_transactions").unwrap().success);
    }

    #[tokio::test]
    async fn test_missing_table_is_a_failure() {
        let (_dir, warehouse) = temp_warehouse().await;

        let report = ValidationGate::new(warehouse).run(&suites()).await.unwrap();
        assert!(!report.success());
        assert_eq!(report.failure_count(), 2);
        assert_eq!(
            report.results[0].failures[0].expectation_kind,
            "table_exists"
        );
    }

    #[tokio::test]
    async fn test_report_serializes_to_json() {
        let (_dir, warehouse) = temp_warehouse().await;
        seed(&warehouse).await;
        sqlx::query("UPDATE fact_transactions SET amount_eur = -1 WHERE user_id = 2")
            .execute(warehouse.pool())
            .await
            .unwrap();

        let report = ValidationGate::new(warehouse).run(&suites()).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][1]["success"], false);
        assert_eq!(json["results"][1]["failures"][0]["expectation_kind"], "range");
    }
}
