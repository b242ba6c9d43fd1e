use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use medallion_config::shared::TableConfig;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::bronze::BronzeLoader;
use crate::classify::{RECORD_ERROR_LENGTH, truncate_chars};
use crate::error::{ErrorKind, MedallionResult};
use crate::medallion_error;
use crate::silver::SilverMerger;
use crate::sink::ResultSink;
use crate::source::{LocationResolver, SourceReader};
use crate::store::TableStore;
use crate::types::{
    BronzeMetrics, Layer, LayerMetrics, ProcessingResult, ProcessingStatus, ResultTracker,
    RunSummary, RunTimestamp, RunWindow, SilverMetrics,
};

/// Tables of one source to process for one run.
#[derive(Debug, Clone)]
pub struct LayerPlan {
    pub source: String,
    pub run_id: String,
    pub run_ts: RunTimestamp,
    /// Root folder of the exports, the `base_files` of the DAG.
    pub base_files: String,
    pub tables: Vec<TableConfig>,
}

/// Records and summary produced by one layer run.
#[derive(Debug, Clone)]
pub struct LayerReport {
    pub results: Vec<ProcessingResult>,
    pub summary: RunSummary,
}

/// Loads every table of `plan` into Bronze with at most `workers` tables in flight.
pub async fn run_bronze_layer<S, R, L, K>(
    loader: Arc<BronzeLoader<S, R, L>>,
    sink: &K,
    plan: &LayerPlan,
    workers: usize,
) -> MedallionResult<LayerReport>
where
    S: TableStore + Send + Sync + 'static,
    R: SourceReader + Send + Sync + 'static,
    L: LocationResolver + Send + Sync + 'static,
    K: ResultSink,
{
    let run_started = Utc::now();
    let results = run_tables(plan, Layer::Bronze, workers, |table| {
        let loader = loader.clone();
        let source = plan.source.clone();
        let run_id = plan.run_id.clone();
        let run_ts = plan.run_ts.clone();
        let base_files = plan.base_files.clone();

        async move {
            loader
                .process_bronze_table(
                    &table,
                    &source,
                    &run_id,
                    &run_ts,
                    run_ts.run_date(),
                    &base_files,
                )
                .await
        }
    })
    .await?;

    report(sink, plan, Layer::Bronze, workers, run_started, results).await
}

/// Merges every table of `plan` into Silver with at most `workers` tables in flight.
pub async fn run_silver_layer<S, K>(
    merger: Arc<SilverMerger<S>>,
    sink: &K,
    plan: &LayerPlan,
    workers: usize,
) -> MedallionResult<LayerReport>
where
    S: TableStore + Send + Sync + 'static,
    K: ResultSink,
{
    let run_started = Utc::now();
    let results = run_tables(plan, Layer::Silver, workers, |table| {
        let merger = merger.clone();
        let source = plan.source.clone();
        let run_id = plan.run_id.clone();
        let run_ts = plan.run_ts.clone();

        async move {
            merger
                .process_silver_cdc_merge(&table, &source, &run_id, &run_ts)
                .await
        }
    })
    .await?;

    report(sink, plan, Layer::Silver, workers, run_started, results).await
}

/// Runs one task per table and returns the records in plan order.
///
/// A task that returns an error or panics is turned into a failed record for its table.
async fn run_tables<F, Fut>(
    plan: &LayerPlan,
    layer: Layer,
    workers: usize,
    mut process: F,
) -> MedallionResult<Vec<ProcessingResult>>
where
    F: FnMut(TableConfig) -> Fut,
    Fut: Future<Output = MedallionResult<ProcessingResult>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set = JoinSet::new();

    for (position, table) in plan.tables.iter().enumerate() {
        let semaphore = semaphore.clone();
        let task = process(table.clone());

        join_set.spawn(async move {
            // The semaphore is never closed, so acquiring only waits.
            let _permit = semaphore.acquire_owned().await;
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            (position, outcome)
        });
    }

    let mut slots: Vec<Option<ProcessingResult>> = vec![None; plan.tables.len()];
    while let Some(joined) = join_set.join_next().await {
        let (position, outcome) = joined.map_err(|err| {
            medallion_error!(
                ErrorKind::TableWorkerPanic,
                "A table task did not complete",
                err
            )
        })?;
        let table = &plan.tables[position];

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                error!(table = %table.name, error = %err, "table task returned an error");
                failed_record(plan, layer, table, &err.message())
            }
            Err(panic) => {
                let message = format!("Table task panicked: {}", panic_message(&*panic));
                error!(table = %table.name, "{message}");
                failed_record(plan, layer, table, &message)
            }
        };
        slots[position] = Some(result);
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Writes records and the run summary to the sink.
///
/// Sink failures are logged and never fail the run.
async fn report<K>(
    sink: &K,
    plan: &LayerPlan,
    layer: Layer,
    workers: usize,
    run_start: chrono::DateTime<Utc>,
    results: Vec<ProcessingResult>,
) -> MedallionResult<LayerReport>
where
    K: ResultSink,
{
    let window = RunWindow {
        run_id: plan.run_id.clone(),
        run_ts: plan.run_ts.to_string(),
        run_date: plan.run_ts.run_date(),
        source: plan.source.clone(),
        layer,
        run_start,
        run_end: Utc::now(),
    };
    let summary = RunSummary::from_results(window, &results, workers);

    if let Err(err) = sink.write_results(&results).await {
        warn!(%layer, error = %err, "failed to write processing results");
    }
    if let Err(err) = sink.write_summary(&summary).await {
        warn!(%layer, error = %err, "failed to write run summary");
    }

    info!(
        source = %summary.source,
        %layer,
        status = %summary.status,
        tables = summary.total_tables,
        failed = summary.tables_failed,
        rows = summary.total_rows,
        workers = summary.workers,
        efficiency_pct = summary.efficiency_pct,
        "layer run finished"
    );

    Ok(LayerReport { results, summary })
}

fn failed_record(
    plan: &LayerPlan,
    layer: Layer,
    table: &TableConfig,
    message: &str,
) -> ProcessingResult {
    let (tag, metrics) = match layer {
        Layer::Bronze => (
            None,
            LayerMetrics::Bronze(BronzeMetrics::default()),
        ),
        Layer::Silver => (
            Some("silver"),
            LayerMetrics::Silver(SilverMetrics {
                rows_deleted: Some(0),
                ..Default::default()
            }),
        ),
    };

    let mut tracker = ResultTracker::start(
        tag,
        &plan.source,
        table.name.trim(),
        &plan.run_id,
        &plan.run_ts,
        plan.run_ts.run_date(),
    );
    tracker.set_load_mode(table.load_mode_name());

    tracker.finish(
        ProcessingStatus::Failed,
        metrics,
        Some(truncate_chars(message, RECORD_ERROR_LENGTH).to_string()),
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
