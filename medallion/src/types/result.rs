use std::fmt;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::run::RunTimestamp;

/// Pipeline layer a record or summary belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Bronze,
    Silver,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Bronze => "bronze",
            Layer::Silver => "silver",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of a per-table operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Success,
    Failed,
    Skipped,
    Empty,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Success => "SUCCESS",
            ProcessingStatus::Failed => "FAILED",
            ProcessingStatus::Skipped => "SKIPPED",
            ProcessingStatus::Empty => "EMPTY",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counts of a Bronze load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BronzeMetrics {
    /// Rows written according to the table store; `None` when nothing was attempted.
    pub rows_processed: Option<u64>,
}

/// Row counts of a Silver merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilverMetrics {
    pub rows_inserted: Option<u64>,
    pub rows_updated: Option<u64>,
    pub rows_deleted: Option<u64>,
    pub rows_unchanged: Option<u64>,
    pub total_silver_rows: Option<u64>,
    pub bronze_rows: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum LayerMetrics {
    Bronze(BronzeMetrics),
    Silver(SilverMetrics),
}

impl LayerMetrics {
    pub fn layer(&self) -> Layer {
        match self {
            LayerMetrics::Bronze(_) => Layer::Bronze,
            LayerMetrics::Silver(_) => Layer::Silver,
        }
    }
}

/// Outcome of one table in one layer of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub log_id: String,
    pub run_id: String,
    pub run_ts: String,
    pub run_date: NaiveDate,
    pub source: String,
    pub table_name: String,
    pub load_mode: Option<String>,
    pub status: ProcessingStatus,
    #[serde(flatten)]
    pub metrics: LayerMetrics,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
    /// Export folder for Bronze, Bronze table for Silver.
    pub source_location: Option<String>,
    /// Bronze or Silver table written.
    pub target_table: Option<String>,
}

impl ProcessingResult {
    pub fn layer(&self) -> Layer {
        self.metrics.layer()
    }

    pub fn bronze_metrics(&self) -> Option<&BronzeMetrics> {
        match &self.metrics {
            LayerMetrics::Bronze(metrics) => Some(metrics),
            LayerMetrics::Silver(_) => None,
        }
    }

    pub fn silver_metrics(&self) -> Option<&SilverMetrics> {
        match &self.metrics {
            LayerMetrics::Silver(metrics) => Some(metrics),
            LayerMetrics::Bronze(_) => None,
        }
    }

    /// Rows read for this table: written rows for Bronze, Bronze input rows for Silver.
    pub fn rows_read(&self) -> u64 {
        match &self.metrics {
            LayerMetrics::Bronze(metrics) => metrics.rows_processed.unwrap_or(0),
            LayerMetrics::Silver(metrics) => metrics.bronze_rows.unwrap_or(0),
        }
    }
}

/// Identifiers and timing of a per-table operation while it runs.
///
/// Created when the operation starts and consumed by [`ResultTracker::finish`], which stamps
/// the end time and duration onto the final [`ProcessingResult`].
#[derive(Debug)]
pub struct ResultTracker {
    log_id: String,
    run_id: String,
    run_ts: RunTimestamp,
    run_date: NaiveDate,
    source: String,
    table_name: String,
    load_mode: Option<String>,
    source_location: Option<String>,
    target_table: Option<String>,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl ResultTracker {
    /// Starts tracking and derives the log id `{source}:{table}:{run_ts}[:{tag}]:{uuid8}`.
    pub fn start(
        layer_tag: Option<&str>,
        source: &str,
        table_name: &str,
        run_id: &str,
        run_ts: &RunTimestamp,
        run_date: NaiveDate,
    ) -> Self {
        let short_id = short_uuid();
        let log_id = match layer_tag {
            Some(tag) => format!("{source}:{table_name}:{run_ts}:{tag}:{short_id}"),
            None => format!("{source}:{table_name}:{run_ts}:{short_id}"),
        };

        Self {
            log_id,
            run_id: run_id.to_string(),
            run_ts: run_ts.clone(),
            run_date,
            source: source.to_string(),
            table_name: table_name.to_string(),
            load_mode: None,
            source_location: None,
            target_table: None,
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    pub fn set_load_mode(&mut self, load_mode: impl Into<String>) {
        self.load_mode = Some(load_mode.into());
    }

    pub fn set_source_location(&mut self, location: impl Into<String>) {
        self.source_location = Some(location.into());
    }

    pub fn set_target_table(&mut self, table: impl Into<String>) {
        self.target_table = Some(table.into());
    }

    pub fn finish(
        self,
        status: ProcessingStatus,
        metrics: LayerMetrics,
        error_message: Option<String>,
    ) -> ProcessingResult {
        ProcessingResult {
            log_id: self.log_id,
            run_id: self.run_id,
            run_ts: self.run_ts.to_string(),
            run_date: self.run_date,
            source: self.source,
            table_name: self.table_name,
            load_mode: self.load_mode,
            status,
            metrics,
            start_time: self.start_time,
            end_time: Utc::now(),
            duration_seconds: self.started.elapsed().as_secs_f64(),
            error_message,
            source_location: self.source_location,
            target_table: self.target_table,
        }
    }
}

/// First eight hex characters of a random UUID.
pub fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
