use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::classify::{DEFAULT_MAX_ERROR_LENGTH, truncate_error_message};
use crate::error::MedallionResult;
use crate::sink::base::ResultSink;
use crate::types::{Layer, ProcessingResult, RunSummary};

const RECORD_TYPE_FIELD: &str = "record_type";
const RESULT_RECORD: &str = "result";
const SUMMARY_RECORD: &str = "summary";

/// Appends records to a JSON-lines file.
///
/// Every line is one JSON object with a `record_type` of `result` or `summary`. Error messages
/// are truncated before they are written.
#[derive(Debug, Clone)]
pub struct JsonlResultSink {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonlResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render<T: Serialize>(record: &T, record_type: &str) -> MedallionResult<String> {
        let mut value = serde_json::to_value(record)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(RECORD_TYPE_FIELD.to_string(), record_type.into());
        }

        let mut line = serde_json::to_string(&value)?;
        line.push('\n');

        Ok(line)
    }

    /// Reads every record of one type, skipping lines that cannot be parsed.
    async fn read_records<T: DeserializeOwned>(&self, record_type: &str) -> MedallionResult<Vec<T>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            let value: serde_json::Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "skipping unreadable sink line");
                    continue;
                }
            };
            if value.get(RECORD_TYPE_FIELD).and_then(|v| v.as_str()) != Some(record_type) {
                continue;
            }

            match serde_json::from_value::<T>(value) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(path = %self.path.display(), record_type, error = %err, "skipping unreadable sink record");
                }
            }
        }

        Ok(records)
    }

    async fn append(&self, lines: String) -> MedallionResult<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

impl ResultSink for JsonlResultSink {
    async fn write_results(&self, results: &[ProcessingResult]) -> MedallionResult<()> {
        let mut lines = String::new();
        for result in results {
            let mut result = result.clone();
            result.error_message = result
                .error_message
                .map(|message| truncate_error_message(&message, DEFAULT_MAX_ERROR_LENGTH));
            lines.push_str(&Self::render(&result, RESULT_RECORD)?);
        }

        self.append(lines).await
    }

    async fn write_summary(&self, summary: &RunSummary) -> MedallionResult<()> {
        let mut summary = summary.clone();
        summary.error_message = summary
            .error_message
            .map(|message| truncate_error_message(&message, DEFAULT_MAX_ERROR_LENGTH));

        self.append(Self::render(&summary, SUMMARY_RECORD)?).await
    }

    async fn run_summaries(&self, source: &str, layer: Layer) -> MedallionResult<Vec<RunSummary>> {
        let summaries = self.read_records::<RunSummary>(SUMMARY_RECORD).await?;

        Ok(summaries
            .into_iter()
            .filter(|summary| summary.source == source && summary.layer == layer)
            .collect())
    }

    async fn results_for_run(
        &self,
        source: &str,
        run_ts: &str,
        layer: Layer,
    ) -> MedallionResult<Vec<ProcessingResult>> {
        let results = self.read_records::<ProcessingResult>(RESULT_RECORD).await?;

        Ok(results
            .into_iter()
            .filter(|result| {
                result.source == source && result.run_ts == run_ts && result.layer() == layer
            })
            .collect())
    }
}
