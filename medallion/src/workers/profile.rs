use std::collections::BTreeMap;

use medallion_config::shared::{OptimizeFor, WorkerConfig};
use tracing::debug;

use crate::types::RunSummary;

/// Upper bound of the number of past runs considered.
const MAX_LOOKBACK_RUNS: usize = 5;

/// Runs below this efficiency say more about scheduling noise than about the worker count.
const MIN_USABLE_EFFICIENCY_PCT: f64 = 20.0;

/// Worker counts whose average metric is at least this share of the best one are equivalent.
const CANDIDATE_SHARE: f64 = 0.95;

/// Largest step, up or down, between consecutive runs.
const MAX_STEP: usize = 2;

/// Median row volumes and the worker cap applied below them.
const VOLUME_CAPS: [(u64, usize); 3] = [(100_000, 2), (1_000_000, 4), (10_000_000, 8)];

#[derive(Debug, Clone, Copy)]
struct UsableRun {
    workers: usize,
    rows: u64,
    metric: f64,
}

/// Picks the number of concurrent table tasks for the next run of `source`.
///
/// Looks at the most recent runs of the source in `history`, finds the smallest worker count
/// whose average throughput (or efficiency) is within 5% of the best, caps it by the median
/// data volume and moves at most two workers away from the last run.
pub fn choose_worker_count(history: &[RunSummary], source: &str, config: &WorkerConfig) -> usize {
    let min_workers = usize::from(config.min_workers.max(1));
    let max_workers = usize::from(config.max_workers).max(min_workers);
    let default_workers = usize::from(config.default_workers);
    let lookback = config.lookback_runs.clamp(1, MAX_LOOKBACK_RUNS);

    let mut recent: Vec<&RunSummary> = history
        .iter()
        .filter(|summary| summary.source == source)
        .collect();
    recent.sort_by(|a, b| b.run_start.cmp(&a.run_start));
    recent.truncate(lookback);

    let Some(last) = recent.first() else {
        debug!(source, workers = default_workers, "no run history, using default workers");
        return default_workers;
    };
    let last_workers = if last.workers > 0 {
        last.workers
    } else {
        default_workers
    };

    let usable: Vec<UsableRun> = recent
        .iter()
        .filter(|summary| {
            summary.duration_seconds > 0.0
                && summary.total_rows > 0
                && summary.efficiency_pct >= MIN_USABLE_EFFICIENCY_PCT
        })
        .map(|summary| UsableRun {
            workers: summary.workers,
            rows: summary.total_rows,
            metric: match config.optimize_for {
                OptimizeFor::Throughput => summary.total_rows as f64 / summary.duration_seconds,
                OptimizeFor::Efficiency => summary.efficiency_pct,
            },
        })
        .collect();

    if usable.is_empty() {
        debug!(source, workers = last_workers, "no usable run history, keeping last workers");
        return last_workers;
    }

    let median_rows = median_rows(&usable);

    let mut metrics_by_workers: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for run in &usable {
        let entry = metrics_by_workers.entry(run.workers).or_insert((0.0, 0));
        entry.0 += run.metric;
        entry.1 += 1;
    }
    let averages: Vec<(usize, f64)> = metrics_by_workers
        .into_iter()
        .map(|(workers, (sum, count))| (workers, sum / count as f64))
        .collect();

    let best = averages
        .iter()
        .map(|(_, average)| *average)
        .fold(f64::MIN, f64::max);
    // Averages are ordered by worker count, so the first candidate is the smallest.
    let mut target = averages
        .iter()
        .find(|(_, average)| *average >= CANDIDATE_SHARE * best)
        .map(|(workers, _)| *workers)
        .unwrap_or(last_workers);

    if let Some((_, cap)) = VOLUME_CAPS
        .iter()
        .find(|(threshold, _)| median_rows < *threshold)
    {
        target = target.min(*cap);
    }
    let target = target.clamp(min_workers, max_workers);

    let workers = if target > last_workers {
        (last_workers + MAX_STEP).min(target).min(max_workers)
    } else if target < last_workers {
        last_workers
            .saturating_sub(MAX_STEP)
            .max(target)
            .max(min_workers)
    } else {
        last_workers
    };

    debug!(
        source,
        median_rows,
        last_workers,
        target,
        workers,
        best_metric = best,
        "chose worker count from run history"
    );

    workers
}

fn median_rows(runs: &[UsableRun]) -> u64 {
    let mut rows: Vec<u64> = runs.iter().map(|run| run.rows).collect();
    rows.sort_unstable();

    let mid = rows.len() / 2;
    if rows.len() % 2 == 1 {
        rows[mid]
    } else {
        (rows[mid - 1] + rows[mid]) / 2
    }
}
