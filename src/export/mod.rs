//! CSV export of warehouse tables and aggregate reports

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ExportError;
use crate::warehouse::{quote_ident, TableSnapshot, Warehouse};

pub type ExportResult<T> = Result<T, ExportError>;

/// A named read-only query whose result is written as `<name>.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportQuery {
    pub name: String,
    pub sql: String,
}

impl ReportQuery {
    pub fn new(name: &str, sql: &str) -> Self {
        Self {
            name: name.to_string(),
            sql: sql.to_string(),
        }
    }

    /// Selected columns of one table, in storage order
    pub fn table(table: &str, columns: &[&str]) -> ExportResult<Self> {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        };
        Ok(Self {
            name: table.to_string(),
            sql: format!("SELECT {projection} FROM {} ORDER BY rowid", quote_ident(table)?),
        })
    }
}

/// Write a materialized result as CSV with a header row
pub fn write_csv(path: &Path, snapshot: &TableSnapshot) -> ExportResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ExportError::io(parent, e))?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&snapshot.columns)?;
    for row in &snapshot.rows {
        writer.write_record(row.iter().map(ToString::to_string))?;
    }
    writer.flush().map_err(|e| ExportError::io(path, e))?;
    Ok(())
}

/// Run every report against `warehouse` and write them below `out_dir`
pub async fn export_reports(
    warehouse: &Warehouse,
    reports: &[ReportQuery],
    out_dir: &Path,
) -> ExportResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(reports.len());
    for report in reports {
        let snapshot = warehouse.fetch(&report.sql).await?;
        let path = out_dir.join(format!("{}.csv", report.name));
        write_csv(&path, &snapshot)?;
        info!(
            report = %report.name,
            rows = snapshot.len(),
            path = %path.display(),
            "report exported"
        );
        written.push(path);
    }
    Ok(written)
}
