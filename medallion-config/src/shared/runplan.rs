use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors raised while reading a run plan.
#[derive(Debug, Error)]
pub enum RunPlanError {
    #[error("failed to read run plan `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse run plan `{}`: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One scheduled run of a source.
///
/// A source may appear more than once, for example with separate weekday and weekend entries.
/// Scheduling fields are owned by the orchestrator and kept as they are.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunPlanEntry {
    pub source: String,
    #[serde(flatten)]
    pub schedule: BTreeMap<String, serde_json::Value>,
}

/// Loads the run plan, a JSON list of [`RunPlanEntry`].
///
/// A missing file is logged and yields an empty plan.
pub fn load_runplan(path: &Path) -> Result<Vec<RunPlanEntry>, RunPlanError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "run plan not found");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(RunPlanError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&contents).map_err(|source| RunPlanError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Returns the run plan entries of `source`, in file order.
pub fn source_schedule(path: &Path, source: &str) -> Result<Vec<RunPlanEntry>, RunPlanError> {
    Ok(load_runplan(path)?
        .into_iter()
        .filter(|entry| entry.source == source)
        .collect())
}
