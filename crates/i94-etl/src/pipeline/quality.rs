//! Post-load row count checks
//!
//! A check that finds too few rows is a failed verdict, logged as a warning.
//! Only an unreachable table raises an error.

use crate::error::EtlResult;
use crate::models::Table;
use crate::session::WarehouseSession;
use serde::Serialize;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityCheck {
    pub table: Table,
    pub min_rows: i64,
}

impl QualityCheck {
    pub fn new(table: Table, min_rows: i64) -> Self {
        Self { table, min_rows }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityVerdict {
    pub table: Table,
    pub min_rows: i64,
    pub actual_rows: i64,
    pub passed: bool,
}

#[instrument(skip(session))]
pub async fn check_row_count(
    session: &mut dyn WarehouseSession,
    check: QualityCheck,
) -> EtlResult<QualityVerdict> {
    let actual_rows = session.count_rows(check.table).await?;
    let verdict = QualityVerdict {
        table: check.table,
        min_rows: check.min_rows,
        actual_rows,
        passed: actual_rows >= check.min_rows,
    };

    if verdict.passed {
        info!("Data quality check passed for {} ({} rows)", check.table, actual_rows);
    } else {
        warn!(
            "Data quality check failed for {}: {} rows, expected at least {}",
            check.table, actual_rows, check.min_rows
        );
    }

    Ok(verdict)
}

/// Run every check in order, stopping only on an infrastructure error
pub async fn run_quality_gate(
    session: &mut dyn WarehouseSession,
    checks: &[QualityCheck],
) -> EtlResult<Vec<QualityVerdict>> {
    let mut verdicts = Vec::with_capacity(checks.len());
    for check in checks {
        verdicts.push(check_row_count(session, *check).await?);
    }
    Ok(verdicts)
}
