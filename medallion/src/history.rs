//! Collapsing append-only Bronze history into current state.

use std::collections::HashMap;

use crate::columns::BRONZE_LOAD_TS;
use crate::error::MedallionResult;
use crate::types::{Cell, KeyExtractor, RowSet};

/// Returns one row per business key: the latest version at or before `cutoff_ts`.
///
/// Versions are ordered by `_bronze_load_ts`, compared as text since run timestamps are
/// fixed-width. When a key has several rows with the same greatest load timestamp, the row that
/// comes later in `history` wins, which is the row ingested last. Rows with a null load
/// timestamp are dropped when a cutoff is given and otherwise only win when the key has no
/// stamped version. Output rows keep their relative order from `history`.
pub fn reconstruct_bronze_current_state<S: AsRef<str>>(
    history: &RowSet,
    business_keys: &[S],
    cutoff_ts: Option<&str>,
) -> MedallionResult<RowSet> {
    let ts_index = history.require_columns(&[BRONZE_LOAD_TS])?[0];
    let keys = KeyExtractor::new(history, business_keys)?;

    // Key -> (load timestamp, position) of the current winner.
    let mut latest: HashMap<_, (Option<&str>, usize)> = HashMap::new();
    for (position, row) in history.rows().iter().enumerate() {
        let load_ts = match row.get(ts_index) {
            Cell::String(value) => Some(value.as_str()),
            _ => None,
        };

        if let Some(cutoff) = cutoff_ts {
            match load_ts {
                Some(ts) if ts <= cutoff => {}
                _ => continue,
            }
        }

        latest
            .entry(keys.key(row))
            .and_modify(|winner: &mut (Option<&str>, usize)| {
                if load_ts >= winner.0 {
                    *winner = (load_ts, position);
                }
            })
            .or_insert((load_ts, position));
    }

    let mut positions: Vec<usize> = latest.into_values().map(|(_, position)| position).collect();
    positions.sort_unstable();

    Ok(history.take(&positions))
}
