//! Change classification between a hashed Bronze state and a Silver table.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::columns::IS_DELETED;
use crate::error::{ErrorKind, MedallionResult};
use crate::types::{BusinessKey, Cell, KeyExtractor, RowSet};

/// Keys of a Bronze state grouped by how they relate to Silver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowChanges {
    /// Keys present only in Bronze.
    pub inserts: Vec<BusinessKey>,
    /// Keys present in both with differing hashes.
    pub updates: Vec<BusinessKey>,
    /// Keys present in both with equal hashes.
    pub unchanged: Vec<BusinessKey>,
}

/// Counts of a full outer comparison of two hashed datasets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDifferences {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub unchanged: u64,
}

/// Totals and change rate of one merge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CdcStatistics {
    pub total_rows: u64,
    pub total_changes: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub unchanged: u64,
    pub change_rate_pct: f64,
}

impl CdcStatistics {
    pub fn new(inserts: u64, updates: u64, deletes: u64, unchanged: u64) -> Self {
        let total_rows = inserts + updates + deletes + unchanged;
        let total_changes = inserts + updates + deletes;
        let change_rate_pct = if total_rows > 0 {
            total_changes as f64 / total_rows as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total_rows,
            total_changes,
            inserts,
            updates,
            deletes,
            unchanged,
            change_rate_pct,
        }
    }
}

/// Maps each key of `rows` to its hash. Later rows win for duplicate keys.
fn hashes_by_key<S: AsRef<str>>(
    rows: &RowSet,
    business_keys: &[S],
    hash_column: &str,
) -> MedallionResult<HashMap<BusinessKey, Cell>> {
    let Some(hash_index) = rows.column_index(hash_column) else {
        bail!(
            ErrorKind::UnknownColumn,
            "Hash column must exist in both datasets",
            hash_column
        );
    };
    let keys = KeyExtractor::new(rows, business_keys)?;

    Ok(rows
        .rows()
        .iter()
        .map(|row| (keys.key(row), row.get(hash_index).clone()))
        .collect())
}

/// Classifies Bronze keys against Silver by key presence and hash equality.
///
/// Keys are listed in Bronze row order.
pub fn compare_row_hashes<S: AsRef<str>>(
    bronze: &RowSet,
    silver: &RowSet,
    business_keys: &[S],
    hash_column: &str,
) -> MedallionResult<RowChanges> {
    let silver_hashes = hashes_by_key(silver, business_keys, hash_column)?;
    let Some(hash_index) = bronze.column_index(hash_column) else {
        bail!(
            ErrorKind::UnknownColumn,
            "Hash column must exist in both datasets",
            hash_column
        );
    };
    let keys = KeyExtractor::new(bronze, business_keys)?;

    let mut changes = RowChanges::default();
    for row in bronze.rows() {
        let key = keys.key(row);
        match silver_hashes.get(&key) {
            None => changes.inserts.push(key),
            Some(hash) if hash != row.get(hash_index) => changes.updates.push(key),
            Some(_) => changes.unchanged.push(key),
        }
    }

    Ok(changes)
}

/// Counts inserts, updates, deletes and unchanged keys of `source` relative to `target`.
pub fn compare_hash_differences<S: AsRef<str>>(
    source: &RowSet,
    target: &RowSet,
    business_keys: &[S],
    hash_column: &str,
) -> MedallionResult<HashDifferences> {
    let source_hashes = hashes_by_key(source, business_keys, hash_column)?;
    let target_hashes = hashes_by_key(target, business_keys, hash_column)?;

    let mut differences = HashDifferences::default();
    for (key, hash) in &source_hashes {
        match target_hashes.get(key) {
            None => differences.inserts += 1,
            Some(target_hash) if target_hash != hash => differences.updates += 1,
            Some(_) => differences.unchanged += 1,
        }
    }
    differences.deletes = target_hashes
        .keys()
        .filter(|key| !source_hashes.contains_key(*key))
        .count() as u64;

    Ok(differences)
}

/// Keys of active Silver rows that no longer appear in the Bronze current state.
///
/// A row is active when `is_deleted` is not `true`. Keys are listed in Silver row order.
pub fn detect_deletes<S: AsRef<str>>(
    bronze_current: &RowSet,
    silver: &RowSet,
    business_keys: &[S],
) -> MedallionResult<Vec<BusinessKey>> {
    let bronze_keys = KeyExtractor::new(bronze_current, business_keys)?;
    let present: HashSet<BusinessKey> = bronze_current
        .rows()
        .iter()
        .map(|row| bronze_keys.key(row))
        .collect();

    let silver_keys = KeyExtractor::new(silver, business_keys)?;
    let deleted_index = silver.column_index(IS_DELETED);

    Ok(silver
        .rows()
        .iter()
        .filter(|row| {
            deleted_index
                .map(|index| row.get(index).as_bool() != Some(true))
                .unwrap_or(true)
        })
        .map(|row| silver_keys.key(row))
        .filter(|key| !present.contains(key))
        .collect())
}
