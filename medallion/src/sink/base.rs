use std::collections::HashMap;
use std::future::Future;

use crate::error::MedallionResult;
use crate::types::{Layer, ProcessingResult, ProcessingStatus, RunSummary};

/// Destination of per-table processing records and run summaries.
///
/// Besides storing records, a sink answers questions about earlier runs: which tables of a run
/// failed, and what the latest layer summary looked like. Retries and worker sizing read these.
pub trait ResultSink {
    /// Stores a batch of per-table records.
    fn write_results(
        &self,
        results: &[ProcessingResult],
    ) -> impl Future<Output = MedallionResult<()>> + Send;

    /// Stores the summary of one layer run.
    fn write_summary(&self, summary: &RunSummary)
    -> impl Future<Output = MedallionResult<()>> + Send;

    /// Returns earlier summaries of a source's layer, oldest first.
    fn run_summaries(
        &self,
        source: &str,
        layer: Layer,
    ) -> impl Future<Output = MedallionResult<Vec<RunSummary>>> + Send;

    /// Returns the per-table records of one run of a source's layer, in write order.
    fn results_for_run(
        &self,
        source: &str,
        run_ts: &str,
        layer: Layer,
    ) -> impl Future<Output = MedallionResult<Vec<ProcessingResult>>> + Send;

    /// Tables whose latest record for the run is [`ProcessingStatus::Failed`].
    ///
    /// A table that failed and then succeeded on a retry of the same run is not listed.
    fn failed_tables(
        &self,
        source: &str,
        run_ts: &str,
        layer: Layer,
    ) -> impl Future<Output = MedallionResult<Vec<String>>> + Send
    where
        Self: Sync,
    {
        async move {
            let results = self.results_for_run(source, run_ts, layer).await?;
            Ok(tables_with_latest_status(&results, ProcessingStatus::Failed))
        }
    }

    /// Tables whose latest record for the run is [`ProcessingStatus::Success`].
    fn successful_tables(
        &self,
        source: &str,
        run_ts: &str,
        layer: Layer,
    ) -> impl Future<Output = MedallionResult<Vec<String>>> + Send
    where
        Self: Sync,
    {
        async move {
            let results = self.results_for_run(source, run_ts, layer).await?;
            Ok(tables_with_latest_status(&results, ProcessingStatus::Success))
        }
    }

    /// Returns `true` when the table has a successful record for the run.
    fn is_table_processed(
        &self,
        source: &str,
        run_ts: &str,
        table: &str,
        layer: Layer,
    ) -> impl Future<Output = MedallionResult<bool>> + Send
    where
        Self: Sync,
    {
        async move {
            let results = self.results_for_run(source, run_ts, layer).await?;
            Ok(results.iter().any(|result| {
                result.table_name == table && result.status == ProcessingStatus::Success
            }))
        }
    }

    /// Summary with the greatest run timestamp of a source's layer.
    ///
    /// Among summaries of the same run timestamp the last written one wins.
    fn latest_run_summary(
        &self,
        source: &str,
        layer: Layer,
    ) -> impl Future<Output = MedallionResult<Option<RunSummary>>> + Send
    where
        Self: Sync,
    {
        async move {
            let summaries = self.run_summaries(source, layer).await?;
            Ok(summaries
                .into_iter()
                .max_by(|a, b| a.run_ts.cmp(&b.run_ts)))
        }
    }
}

/// Distinct table names, in first-seen order, whose last record has `status`.
fn tables_with_latest_status(
    results: &[ProcessingResult],
    status: ProcessingStatus,
) -> Vec<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, ProcessingStatus> = HashMap::new();
    for result in results {
        if latest
            .insert(result.table_name.as_str(), result.status)
            .is_none()
        {
            order.push(result.table_name.as_str());
        }
    }

    order
        .into_iter()
        .filter(|table| latest.get(table) == Some(&status))
        .map(str::to_string)
        .collect()
}
