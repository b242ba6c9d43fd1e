use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{ValidationError, WorkerConfig};

/// Configuration of the medallion runner binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Path of the DAG file describing the source and its tables.
    pub dag_path: String,
    /// Root directory under which `{base_files}/{source}/...` exports are found.
    pub files_root: String,
    /// Root directory of the Bronze and Silver table store.
    pub warehouse_path: String,
    /// JSON-lines file receiving processing results and run summaries.
    pub log_sink_path: String,
    /// JSON run plan listing the scheduled runs of every source.
    #[serde(default)]
    pub runplan_path: Option<String>,
    #[serde(default)]
    pub workers: WorkerConfig,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("dag_path", &self.dag_path),
            ("files_root", &self.files_root),
            ("warehouse_path", &self.warehouse_path),
            ("log_sink_path", &self.log_sink_path),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(field.to_string()));
            }
        }

        self.workers.validate()
    }
}

impl Config for RunnerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
