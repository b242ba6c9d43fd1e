//! Content fingerprints of rows.
//!
//! A row hash is a hex digest over the text casts of a resolved column set. Columns are sorted
//! by name before hashing so the fingerprint does not depend on column order, nulls are
//! replaced by a token, and values are joined with a separator.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::bail;
use crate::error::{ErrorKind, MedallionError, MedallionResult};
use crate::types::{Cell, ColumnSchema, ColumnType, RowSet};

pub const DEFAULT_HASH_COLUMN: &str = "row_hash";

pub const DEFAULT_NULL_TOKEN: &str = "∅";

pub const DEFAULT_SEPARATOR: &str = "|";

/// Column prefixes skipped by [`add_business_hash`].
pub const METADATA_PREFIXES: &[&str] = &["_bronze_", "_silver_", "_load_", "_metadata_"];

/// Column prefixes that are never business data.
pub const BUSINESS_EXCLUDED_PREFIXES: &[&str] = &["_bronze_", "_silver_", "_metadata_"];

/// Digest used for row hashes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// 64 hex characters.
    #[default]
    Sha256,
    /// 32 hex characters.
    Md5,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Md5 => "md5",
        }
    }

    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Md5 => 32,
        }
    }

    fn digest_hex(&self, input: &str) -> String {
        match self {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
            HashAlgorithm::Md5 => hex::encode(Md5::digest(input.as_bytes())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = MedallionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "md5" => Ok(HashAlgorithm::Md5),
            other => bail!(
                ErrorKind::ConfigError,
                "Unsupported hash algorithm",
                format!("'{other}', use 'sha256' or 'md5'")
            ),
        }
    }
}

/// Full set of row hash parameters.
#[derive(Debug, Clone)]
pub struct RowHashOptions {
    pub hash_column: String,
    /// Columns to hash; all columns when `None`.
    pub include_cols: Option<Vec<String>>,
    /// Columns removed after inclusion.
    pub exclude_cols: Option<Vec<String>>,
    pub null_token: String,
    pub separator: String,
    pub algorithm: HashAlgorithm,
}

impl Default for RowHashOptions {
    fn default() -> Self {
        Self {
            hash_column: DEFAULT_HASH_COLUMN.to_string(),
            include_cols: None,
            exclude_cols: None,
            null_token: DEFAULT_NULL_TOKEN.to_string(),
            separator: DEFAULT_SEPARATOR.to_string(),
            algorithm: HashAlgorithm::default(),
        }
    }
}

/// Adds `hash_column` with the default null token and separator.
pub fn add_row_hash(
    rows: RowSet,
    hash_column: &str,
    include_cols: Option<&[String]>,
    exclude_cols: Option<&[String]>,
    algorithm: HashAlgorithm,
) -> MedallionResult<RowSet> {
    let options = RowHashOptions {
        hash_column: hash_column.to_string(),
        include_cols: include_cols.map(<[String]>::to_vec),
        exclude_cols: exclude_cols.map(<[String]>::to_vec),
        algorithm,
        ..RowHashOptions::default()
    };

    add_row_hash_with(rows, &options)
}

/// Adds a hash column described by `options`.
///
/// Fails with [`ErrorKind::ColumnAlreadyExists`] when the hash column is present, with
/// [`ErrorKind::UnknownColumn`] when an included or excluded column is missing, and with
/// [`ErrorKind::NoHashableColumns`] when no column is left to hash.
pub fn add_row_hash_with(mut rows: RowSet, options: &RowHashOptions) -> MedallionResult<RowSet> {
    if rows.has_column(&options.hash_column) {
        bail!(
            ErrorKind::ColumnAlreadyExists,
            "Hash column already exists in dataset",
            options.hash_column
        );
    }

    let columns = resolve_hash_columns(
        &rows.column_names(),
        options.include_cols.as_deref(),
        options.exclude_cols.as_deref(),
    )?;
    let indices = rows.require_columns(&columns)?;

    let hashes = rows
        .rows()
        .iter()
        .map(|row| {
            let joined = indices
                .iter()
                .map(|index| {
                    row.get(*index)
                        .to_text()
                        .unwrap_or_else(|| options.null_token.clone())
                })
                .collect::<Vec<_>>()
                .join(&options.separator);

            Cell::String(options.algorithm.digest_hex(&joined))
        })
        .collect();

    rows.push_column(
        ColumnSchema::new(options.hash_column.clone(), ColumnType::String, false),
        hashes,
    )?;

    Ok(rows)
}

/// Resolves the sorted list of columns to hash.
pub fn resolve_hash_columns(
    all_columns: &[&str],
    include_cols: Option<&[String]>,
    exclude_cols: Option<&[String]>,
) -> MedallionResult<Vec<String>> {
    let available: BTreeSet<&str> = all_columns.iter().copied().collect();

    let mut chosen: BTreeSet<&str> = match include_cols {
        None => available.clone(),
        Some(include) => {
            let include: BTreeSet<&str> = include.iter().map(String::as_str).collect();
            let missing: Vec<&str> = include.difference(&available).copied().collect();
            if !missing.is_empty() {
                bail!(
                    ErrorKind::UnknownColumn,
                    "Include columns not found in dataset",
                    missing.join(", ")
                );
            }
            include
        }
    };

    if let Some(exclude) = exclude_cols {
        let exclude: BTreeSet<&str> = exclude.iter().map(String::as_str).collect();
        let missing: Vec<&str> = exclude.difference(&available).copied().collect();
        if !missing.is_empty() {
            bail!(
                ErrorKind::UnknownColumn,
                "Exclude columns not found in dataset",
                missing.join(", ")
            );
        }
        chosen.retain(|column| !exclude.contains(column));
    }

    if chosen.is_empty() {
        bail!(
            ErrorKind::NoHashableColumns,
            "No columns available to hash after include/exclude filters"
        );
    }

    Ok(chosen.into_iter().map(str::to_string).collect())
}

/// Hashes every column except metadata columns (see [`METADATA_PREFIXES`]).
pub fn add_business_hash(rows: RowSet, hash_column: &str) -> MedallionResult<RowSet> {
    let exclude: Vec<String> = rows
        .column_names()
        .into_iter()
        .filter(|name| has_prefix(name, METADATA_PREFIXES))
        .map(str::to_string)
        .collect();

    add_row_hash(
        rows,
        hash_column,
        None,
        Some(&exclude),
        HashAlgorithm::default(),
    )
}

/// Hashes every column, optionally skipping date and timestamp columns.
///
/// Audit timestamps such as "last modified" would otherwise make unchanged rows look updated.
pub fn add_incremental_hash(
    rows: RowSet,
    exclude_temporal_columns: bool,
    hash_column: &str,
) -> MedallionResult<RowSet> {
    let exclude: Vec<String> = if exclude_temporal_columns {
        rows.columns()
            .iter()
            .filter(|column| column.typ.is_temporal())
            .map(|column| column.name.clone())
            .collect()
    } else {
        Vec::new()
    };

    let exclude = (!exclude.is_empty()).then_some(exclude);
    add_row_hash(
        rows,
        hash_column,
        None,
        exclude.as_deref(),
        HashAlgorithm::default(),
    )
}

/// Like [`add_row_hash`], with the rows first grouped by their business key.
///
/// Rows come back ordered by `business_keys`, rows sharing a key in their original order. The
/// digests are the same as those of [`add_row_hash`].
pub fn add_row_hash_partitioned(
    rows: RowSet,
    business_keys: &[String],
    hash_column: &str,
    include_cols: Option<&[String]>,
    exclude_cols: Option<&[String]>,
    algorithm: HashAlgorithm,
) -> MedallionResult<RowSet> {
    if business_keys.is_empty() {
        bail!(
            ErrorKind::InvalidTableDefinition,
            "Business keys are required to partition rows"
        );
    }

    let grouped = rows.sorted_by_columns(business_keys)?;
    add_row_hash(grouped, hash_column, include_cols, exclude_cols, algorithm)
}

/// Names of the business columns of a dataset (see [`BUSINESS_EXCLUDED_PREFIXES`]).
pub fn business_columns(rows: &RowSet) -> Vec<String> {
    rows.column_names()
        .into_iter()
        .filter(|name| !has_prefix(name, BUSINESS_EXCLUDED_PREFIXES))
        .map(str::to_string)
        .collect()
}

fn has_prefix(name: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| name.starts_with(prefix))
}

/// Checks that `hash_column` holds non-null hex digests of 32 or 64 characters.
///
/// With `max_rows`, only the first `max_rows` rows are inspected. An empty dataset fails
/// because nothing can be validated.
pub fn validate_hash_column(
    rows: &RowSet,
    hash_column: &str,
    max_rows: Option<usize>,
) -> MedallionResult<()> {
    let Some(column) = rows.column(hash_column) else {
        bail!(
            ErrorKind::UnknownColumn,
            "Hash column not found in dataset",
            hash_column
        );
    };

    if !matches!(column.typ, ColumnType::String | ColumnType::Null) {
        bail!(
            ErrorKind::HashValidationFailed,
            "Hash column is not textual",
            format!("column '{hash_column}' has type {:?}", column.typ)
        );
    }

    if rows.is_empty() {
        bail!(
            ErrorKind::HashValidationFailed,
            "Cannot validate hash length: dataset is empty"
        );
    }

    let limit = max_rows.unwrap_or(usize::MAX);
    let values = rows
        .column_values(hash_column)
        .into_iter()
        .flatten()
        .take(limit);

    let mut null_count = 0usize;
    for value in values {
        match value {
            Cell::Null => null_count += 1,
            Cell::String(hash) => {
                if hash.len() != 32 && hash.len() != 64 {
                    bail!(
                        ErrorKind::HashValidationFailed,
                        "Unexpected hash length",
                        format!("hash length {} should be 32 or 64", hash.len())
                    );
                }
            }
            other => bail!(
                ErrorKind::HashValidationFailed,
                "Hash column is not textual",
                format!("found {:?} value", other.column_type())
            ),
        }
    }

    if null_count > 0 {
        bail!(
            ErrorKind::HashValidationFailed,
            "Null values in hash column",
            format!("found {null_count} null values in '{hash_column}'")
        );
    }

    Ok(())
}
