use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::shared::{TableConfig, ValidationError};

const DEFAULT_BASE_FILES: &str = "greenhouse_sources";

const DEFAULT_WATERMARKS_PATH: &str = "config/watermarks.json";

const SUPPORTED_LOAD_MODES: &[&str] = &["snapshot", "window", "incremental"];

/// Errors raised while reading a DAG file.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("DAG file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read DAG file `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse DAG file `{}`: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid DAG: {0}")]
    Invalid(#[from] ValidationError),
}

/// Per-source description of the tables a run processes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DagConfig {
    /// Source system name, also the second segment of every export path.
    pub source: String,
    pub tables: Vec<TableConfig>,
    /// Folder under the files root holding all source exports.
    #[serde(default = "default_base_files")]
    pub base_files: String,
    /// Location of the read-only watermarks file maintained by the extraction pipeline.
    #[serde(default = "default_watermarks_path")]
    pub watermarks_path: String,
    #[serde(default)]
    pub connection_name: Option<String>,
}

impl DagConfig {
    /// Reads and validates a DAG from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, DagError> {
        if !path.is_file() {
            return Err(DagError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|source| DagError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dag: DagConfig = serde_json::from_str(&contents).map_err(|source| DagError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        dag.validate()?;

        Ok(dag)
    }

    /// Validates required fields.
    ///
    /// Unsupported load modes are only reported; the Bronze layer skips those tables.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source.trim().is_empty() {
            return Err(ValidationError::MissingField("source".to_string()));
        }

        if self.tables.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "tables".to_string(),
                constraint: "DAG has no tables defined".to_string(),
            });
        }

        for (index, table) in self.tables.iter().enumerate() {
            let Some(name) = table.name() else {
                return Err(ValidationError::MissingField(format!("tables[{index}].name")));
            };

            let load_mode = table.load_mode_name();
            if !SUPPORTED_LOAD_MODES.contains(&load_mode.as_str()) {
                warn!(table = name, %load_mode, "table has unsupported load_mode");
            }
        }

        Ok(())
    }

    /// Tables whose `enabled` flag is set or missing.
    pub fn enabled_tables(&self) -> Vec<&TableConfig> {
        self.tables.iter().filter(|table| table.is_enabled()).collect()
    }

    /// Enabled tables, narrowed to `retry_tables` when that list is non-empty.
    pub fn tables_to_process(&self, retry_tables: &[String]) -> Vec<&TableConfig> {
        filter_retry_tables(self.enabled_tables(), retry_tables)
    }

    /// Enabled tables with the given load mode.
    pub fn tables_by_load_mode(&self, load_mode: &str) -> Vec<&TableConfig> {
        let load_mode = load_mode.to_lowercase();
        self.enabled_tables()
            .into_iter()
            .filter(|table| table.load_mode_name() == load_mode)
            .collect()
    }

    pub fn summary(&self) -> DagSummary {
        let enabled = self.enabled_tables();

        let mut load_mode_counts = BTreeMap::new();
        for table in &enabled {
            *load_mode_counts.entry(table.load_mode_name()).or_insert(0) += 1;
        }

        DagSummary {
            source: self.source.clone(),
            total_tables: self.tables.len(),
            enabled_tables: enabled.len(),
            disabled_tables: self.tables.len() - enabled.len(),
            load_mode_counts,
        }
    }
}

/// Table counts of a DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagSummary {
    pub source: String,
    pub total_tables: usize,
    pub enabled_tables: usize,
    pub disabled_tables: usize,
    pub load_mode_counts: BTreeMap<String, usize>,
}

/// Keeps only the tables named in `retry_tables`. An empty list keeps everything.
pub fn filter_retry_tables<'a>(
    tables: Vec<&'a TableConfig>,
    retry_tables: &[String],
) -> Vec<&'a TableConfig> {
    if retry_tables.is_empty() {
        return tables;
    }

    let retry_set: BTreeSet<&str> = retry_tables.iter().map(String::as_str).collect();
    let filtered: Vec<&TableConfig> = tables
        .into_iter()
        .filter(|table| retry_set.contains(table.name.as_str()))
        .collect();

    let found: BTreeSet<&str> = filtered.iter().map(|table| table.name.as_str()).collect();
    let missing: Vec<&str> = retry_set.difference(&found).copied().collect();
    if !missing.is_empty() {
        warn!(?missing, "retry tables not found in DAG");
    }

    filtered
}

fn default_base_files() -> String {
    DEFAULT_BASE_FILES.to_string()
}

fn default_watermarks_path() -> String {
    DEFAULT_WATERMARKS_PATH.to_string()
}
