use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::MedallionResult;
use crate::sink::base::ResultSink;
use crate::types::{Layer, ProcessingResult, RunSummary};

#[derive(Debug)]
struct Inner {
    results: Vec<ProcessingResult>,
    summaries: Vec<RunSummary>,
}

/// Keeps records in memory so tests can inspect them.
#[derive(Debug, Clone)]
pub struct MemoryResultSink {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        let inner = Inner {
            results: Vec::new(),
            summaries: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn results(&self) -> Vec<ProcessingResult> {
        let inner = self.inner.lock().await;
        inner.results.clone()
    }

    pub async fn summaries(&self) -> Vec<RunSummary> {
        let inner = self.inner.lock().await;
        inner.summaries.clone()
    }
}

impl Default for MemoryResultSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for MemoryResultSink {
    async fn write_results(&self, results: &[ProcessingResult]) -> MedallionResult<()> {
        let mut inner = self.inner.lock().await;
        inner.results.extend_from_slice(results);

        Ok(())
    }

    async fn write_summary(&self, summary: &RunSummary) -> MedallionResult<()> {
        let mut inner = self.inner.lock().await;
        inner.summaries.push(summary.clone());

        Ok(())
    }

    async fn run_summaries(&self, source: &str, layer: Layer) -> MedallionResult<Vec<RunSummary>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .summaries
            .iter()
            .filter(|summary| summary.source == source && summary.layer == layer)
            .cloned()
            .collect())
    }

    async fn results_for_run(
        &self,
        source: &str,
        run_ts: &str,
        layer: Layer,
    ) -> MedallionResult<Vec<ProcessingResult>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .results
            .iter()
            .filter(|result| {
                result.source == source && result.run_ts == run_ts && result.layer() == layer
            })
            .cloned()
            .collect())
    }
}
