use std::path::Path;
use std::sync::Arc;

use medallion::bronze::BronzeLoader;
use medallion::silver::SilverMerger;
use medallion::sink::ResultSink;
use medallion::sink::jsonl::JsonlResultSink;
use medallion::source::FilesRootResolver;
use medallion::source::local::LocalFileReader;
use medallion::store::TableStore;
use medallion::store::local::LocalTableStore;
use medallion::types::{Layer, RunTimestamp};
use medallion::workers::{
    LayerPlan, LayerReport, choose_worker_count, run_bronze_layer, run_silver_layer,
};
use medallion_config::shared::{
    DagConfig, RunnerConfig, TableConfig, TableName, ValidationError, Watermarks,
    source_schedule,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{RunnerError, RunnerResult};

/// Layers selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LayerSelection {
    Bronze,
    Silver,
    All,
}

impl LayerSelection {
    fn layers(self) -> &'static [Layer] {
        match self {
            LayerSelection::Bronze => &[Layer::Bronze],
            LayerSelection::Silver => &[Layer::Silver],
            LayerSelection::All => &[Layer::Bronze, Layer::Silver],
        }
    }
}

/// Options of one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_ts: String,
    pub run_id: Option<String>,
    pub layer: LayerSelection,
    pub retry_tables: Vec<String>,
    /// Adds the tables whose latest record for this run is FAILED to `retry_tables`.
    pub retry_failed: bool,
    /// Fixed worker count, bypassing the history heuristic.
    pub workers: Option<usize>,
}

/// Runs the selected layers of the configured DAG.
///
/// Bronze runs before Silver. Returns [`RunnerError::TablesFailed`] for the first layer that
/// had failed tables, after every selected layer ran.
pub async fn run_with_config(config: RunnerConfig, request: RunRequest) -> RunnerResult<()> {
    let dag = DagConfig::from_path(Path::new(&config.dag_path)).map_err(RunnerError::config)?;
    let run_ts = RunTimestamp::parse(&request.run_ts)?;
    let run_id = request
        .run_id
        .clone()
        .unwrap_or_else(|| format!("{}_{run_ts}", dag.source));

    log_watermarks(&dag);

    let store = LocalTableStore::new(&config.warehouse_path);
    let sink = JsonlResultSink::new(&config.log_sink_path);

    let mut retry_tables = request.retry_tables.clone();
    if request.retry_failed {
        let failed = failed_in_run(&sink, &dag.source, &run_ts, request.layer).await?;
        if failed.is_empty() && retry_tables.is_empty() {
            info!(source = %dag.source, %run_ts, "no failed tables to retry");
            return Ok(());
        }
        info!(source = %dag.source, %run_ts, tables = ?failed, "retrying failed tables");
        for table in failed {
            if !retry_tables.contains(&table) {
                retry_tables.push(table);
            }
        }
    }

    let tables: Vec<TableConfig> = dag
        .tables_to_process(&retry_tables)
        .into_iter()
        .cloned()
        .collect();
    if tables.is_empty() {
        warn!(source = %dag.source, "no enabled tables to process");
        return Ok(());
    }

    info!(
        source = %dag.source,
        %run_id,
        %run_ts,
        tables = tables.len(),
        layer = ?request.layer,
        "starting medallion run"
    );

    let plan = LayerPlan {
        source: dag.source.clone(),
        run_id,
        run_ts,
        base_files: dag.base_files.clone(),
        tables,
    };

    let mut failure = None;
    for layer in request.layer.layers() {
        let workers = match request.workers {
            Some(workers) => workers.max(1),
            None => {
                let history = sink.run_summaries(&plan.source, *layer).await?;
                choose_worker_count(&history, &plan.source, &config.workers)
            }
        };

        let report = match layer {
            Layer::Bronze => {
                let loader = BronzeLoader::new(
                    store.clone(),
                    LocalFileReader::new(),
                    FilesRootResolver::new(&config.files_root),
                );
                run_bronze_layer(Arc::new(loader), &sink, &plan, workers).await?
            }
            Layer::Silver => {
                let merger = SilverMerger::new(store.clone());
                run_silver_layer(Arc::new(merger), &sink, &plan, workers).await?
            }
        };

        if failure.is_none() {
            failure = failed_tables(*layer, &report);
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Prints the table counts of the configured DAG as JSON.
pub fn summarize_dag(config: &RunnerConfig) -> RunnerResult<String> {
    let dag = DagConfig::from_path(Path::new(&config.dag_path)).map_err(RunnerError::config)?;

    serde_json::to_string_pretty(&dag.summary()).map_err(RunnerError::config)
}

/// Prints the run plan entries of the configured source as JSON.
pub fn source_runplan(config: &RunnerConfig) -> RunnerResult<String> {
    let Some(runplan_path) = &config.runplan_path else {
        return Err(RunnerError::config(ValidationError::MissingField(
            "runplan_path".to_string(),
        )));
    };
    let dag = DagConfig::from_path(Path::new(&config.dag_path)).map_err(RunnerError::config)?;
    let entries =
        source_schedule(Path::new(runplan_path), &dag.source).map_err(RunnerError::config)?;

    serde_json::to_string_pretty(&entries).map_err(RunnerError::config)
}

/// Outcome of maintaining one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMaintenance {
    pub table: String,
    pub layer: Layer,
    /// Version after maintenance.
    pub version: u64,
    pub rows: u64,
    pub files_removed: u64,
}

/// Compacts and vacuums the Bronze and Silver tables of every enabled DAG table.
///
/// Silver tables are rewritten clustered by their business keys before the vacuum. Bronze tables
/// are only vacuumed. Tables that were never written are skipped.
pub async fn run_maintenance(
    config: &RunnerConfig,
    retention_hours: i64,
) -> RunnerResult<Vec<TableMaintenance>> {
    let dag = DagConfig::from_path(Path::new(&config.dag_path)).map_err(RunnerError::config)?;
    let store = LocalTableStore::new(&config.warehouse_path);
    let retention = chrono::Duration::hours(retention_hours.max(0));

    let mut outcomes = Vec::new();
    for table in dag.enabled_tables() {
        let definition = match table.resolve() {
            Ok(definition) => definition,
            Err(err) => {
                warn!(table = %table.name, error = %err, "skipping maintenance of invalid table");
                continue;
            }
        };

        for (layer, name) in [
            (Layer::Bronze, &definition.bronze_table),
            (Layer::Silver, &definition.silver_table),
        ] {
            if store.table_version(name).await?.is_none() {
                debug!(table = %name, "table was never written, skipping maintenance");
                continue;
            }

            if layer == Layer::Silver {
                store.optimize(name, &definition.business_keys).await?;
            }
            let files_removed = store.vacuum(name, retention).await?;
            outcomes.push(maintained(&store, layer, name, files_removed).await?);
        }
    }

    Ok(outcomes)
}

async fn maintained(
    store: &LocalTableStore,
    layer: Layer,
    table: &TableName,
    files_removed: u64,
) -> RunnerResult<TableMaintenance> {
    let version = store.table_version(table).await?.unwrap_or_default();
    let rows = store.table_size(table).await?.unwrap_or_default();
    info!(%table, %layer, version, rows, files_removed, "maintained table");

    Ok(TableMaintenance {
        table: table.to_string(),
        layer,
        version,
        rows,
        files_removed,
    })
}

/// Union of the failed tables of the selected layers, in layer order.
async fn failed_in_run(
    sink: &JsonlResultSink,
    source: &str,
    run_ts: &RunTimestamp,
    selection: LayerSelection,
) -> RunnerResult<Vec<String>> {
    let run_ts = run_ts.to_string();
    let mut failed: Vec<String> = Vec::new();
    for layer in selection.layers() {
        for table in sink.failed_tables(source, &run_ts, *layer).await? {
            if !failed.contains(&table) {
                failed.push(table);
            }
        }
    }

    Ok(failed)
}

fn failed_tables(layer: Layer, report: &LayerReport) -> Option<RunnerError> {
    if report.summary.failed_tables.is_empty() {
        return None;
    }

    Some(RunnerError::TablesFailed {
        layer,
        tables: report.summary.failed_tables.clone(),
    })
}

/// Logs the extraction cursors of the source. The file is owned by the extraction pipeline.
fn log_watermarks(dag: &DagConfig) {
    match Watermarks::from_path(Path::new(&dag.watermarks_path)) {
        Ok(watermarks) => match watermarks.for_source(&dag.source) {
            Some(tables) => debug!(source = %dag.source, tables = tables.len(), "loaded watermarks"),
            None => debug!(source = %dag.source, "no watermarks for source"),
        },
        Err(err) => debug!(error = %err, "watermarks unavailable"),
    }
}
