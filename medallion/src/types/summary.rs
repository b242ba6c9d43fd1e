use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::result::{Layer, ProcessingResult, ProcessingStatus};

/// Overall status of a layer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
    Partial,
}

impl RunStatus {
    /// `SUCCESS` when nothing failed, `FAILED` when every table failed, `PARTIAL` otherwise.
    pub fn from_counts(total_tables: u64, tables_failed: u64) -> Self {
        if tables_failed == 0 {
            RunStatus::Success
        } else if tables_failed == total_tables {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
            RunStatus::Partial => "PARTIAL",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers and wall-clock bounds of a layer run.
#[derive(Debug, Clone)]
pub struct RunWindow {
    pub run_id: String,
    pub run_ts: String,
    pub run_date: NaiveDate,
    pub source: String,
    pub layer: Layer,
    pub run_start: DateTime<Utc>,
    pub run_end: DateTime<Utc>,
}

/// Aggregate of all per-table records of one layer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub log_id: String,
    pub run_id: String,
    pub run_ts: String,
    pub run_date: NaiveDate,
    pub source: String,
    pub layer: Layer,
    pub status: RunStatus,
    pub run_start: DateTime<Utc>,
    pub run_end: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_tables: u64,
    pub tables_success: u64,
    pub tables_empty: u64,
    pub tables_failed: u64,
    pub tables_skipped: u64,
    pub total_rows: u64,
    pub total_inserts: u64,
    pub total_updates: u64,
    pub total_deletes: u64,
    pub total_unchanged: u64,
    pub workers: usize,
    pub sum_task_seconds: f64,
    pub theoretical_min_sec: f64,
    pub actual_time_sec: f64,
    pub efficiency_pct: f64,
    pub failed_tables: Vec<String>,
    pub error_message: Option<String>,
}

impl RunSummary {
    /// Builds the summary of `results`, run with `workers` concurrent tasks.
    ///
    /// Efficiency compares the ideal wall time (`sum_task_seconds / workers`) with the actual
    /// wall time; it is zero when the run took no measurable time.
    pub fn from_results(window: RunWindow, results: &[ProcessingResult], workers: usize) -> Self {
        let count = |status: ProcessingStatus| {
            results.iter().filter(|r| r.status == status).count() as u64
        };

        let total_tables = results.len() as u64;
        let tables_failed = count(ProcessingStatus::Failed);

        let mut total_inserts = 0;
        let mut total_updates = 0;
        let mut total_deletes = 0;
        let mut total_unchanged = 0;
        for metrics in results.iter().filter_map(ProcessingResult::silver_metrics) {
            total_inserts += metrics.rows_inserted.unwrap_or(0);
            total_updates += metrics.rows_updated.unwrap_or(0);
            total_deletes += metrics.rows_deleted.unwrap_or(0);
            total_unchanged += metrics.rows_unchanged.unwrap_or(0);
        }

        let sum_task_seconds: f64 = results.iter().map(|r| r.duration_seconds).sum();
        let workers = workers.max(1);
        let theoretical_min_sec = sum_task_seconds / workers as f64;
        let actual_time_sec = (window.run_end - window.run_start)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let efficiency_pct = if actual_time_sec > 0.0 {
            theoretical_min_sec / actual_time_sec * 100.0
        } else {
            0.0
        };

        let failed_tables: Vec<String> = results
            .iter()
            .filter(|r| r.status == ProcessingStatus::Failed)
            .map(|r| r.table_name.clone())
            .collect();

        RunSummary {
            log_id: format!(
                "{}:{}:{}:{}",
                window.source,
                window.layer,
                window.run_ts,
                crate::types::result::short_uuid()
            ),
            run_id: window.run_id,
            run_ts: window.run_ts,
            run_date: window.run_date,
            source: window.source,
            layer: window.layer,
            status: RunStatus::from_counts(total_tables, tables_failed),
            run_start: window.run_start,
            run_end: window.run_end,
            duration_seconds: actual_time_sec,
            total_tables,
            tables_success: count(ProcessingStatus::Success),
            tables_empty: count(ProcessingStatus::Empty),
            tables_failed,
            tables_skipped: count(ProcessingStatus::Skipped),
            total_rows: results.iter().map(ProcessingResult::rows_read).sum(),
            total_inserts,
            total_updates,
            total_deletes,
            total_unchanged,
            workers,
            sum_task_seconds,
            theoretical_min_sec,
            actual_time_sec,
            efficiency_pct,
            failed_tables,
            error_message: None,
        }
    }
}
