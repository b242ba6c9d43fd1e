use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Metric the worker-count heuristic maximises.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeFor {
    /// Rows per second of wall-clock time.
    #[default]
    Throughput,
    /// Ratio of ideal parallel time to actual wall-clock time.
    Efficiency,
}

/// Bounds for the number of tables processed concurrently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker count used when no run history exists.
    #[serde(default = "default_default_workers")]
    pub default_workers: u16,
    #[serde(default = "default_min_workers")]
    pub min_workers: u16,
    #[serde(default = "default_max_workers")]
    pub max_workers: u16,
    /// Number of recent runs to analyse, clamped to `1..=5`.
    #[serde(default = "default_lookback_runs")]
    pub lookback_runs: usize,
    #[serde(default)]
    pub optimize_for: OptimizeFor,
}

impl WorkerConfig {
    pub const DEFAULT_WORKERS: u16 = 10;

    pub const DEFAULT_MIN_WORKERS: u16 = 2;

    pub const DEFAULT_MAX_WORKERS: u16 = 12;

    pub const DEFAULT_LOOKBACK_RUNS: usize = 5;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_workers == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "workers.min_workers".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.min_workers > self.max_workers {
            return Err(ValidationError::InvalidFieldValue {
                field: "workers.min_workers".to_string(),
                constraint: "must not exceed `workers.max_workers`".to_string(),
            });
        }

        if self.default_workers == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "workers.default_workers".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_workers: default_default_workers(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            lookback_runs: default_lookback_runs(),
            optimize_for: OptimizeFor::default(),
        }
    }
}

fn default_default_workers() -> u16 {
    WorkerConfig::DEFAULT_WORKERS
}

fn default_min_workers() -> u16 {
    WorkerConfig::DEFAULT_MIN_WORKERS
}

fn default_max_workers() -> u16 {
    WorkerConfig::DEFAULT_MAX_WORKERS
}

fn default_lookback_runs() -> usize {
    WorkerConfig::DEFAULT_LOOKBACK_RUNS
}
