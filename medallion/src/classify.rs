//! Message-based classification of storage and source failures.
//!
//! Table stores and readers report failures as text, so the loader decides between "skip",
//! "recreate" and "fail" by matching known substrings. Classes are checked in declaration order
//! and the first match wins.

use std::fmt;

use medallion_config::shared::TableDefinitionError;
use serde::{Deserialize, Serialize};

/// Default limit of [`truncate_error_message`].
pub const DEFAULT_MAX_ERROR_LENGTH: usize = 1000;

/// Limit applied to messages stored in per-table result records.
pub const RECORD_ERROR_LENGTH: usize = 500;

const TRUNCATION_MARKER: &str = "... [TRUNCATED]";

/// Category of a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    MissingPath,
    CorruptStorage,
    SchemaMismatch,
    Timeout,
    Connection,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::MissingPath => "MISSING_PATH",
            ErrorClass::CorruptStorage => "CORRUPT_STORAGE",
            ErrorClass::SchemaMismatch => "SCHEMA_MISMATCH",
            ErrorClass::Timeout => "TIMEOUT",
            ErrorClass::Connection => "CONNECTION",
            ErrorClass::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a failure message.
pub fn classify_error_message(message: &str) -> ErrorClass {
    let message = message.to_lowercase();

    if is_missing_path(&message) {
        ErrorClass::MissingPath
    } else if is_corrupt_storage(&message) {
        ErrorClass::CorruptStorage
    } else if is_schema_mismatch(&message) {
        ErrorClass::SchemaMismatch
    } else if is_timeout(&message) {
        ErrorClass::Timeout
    } else if is_connection(&message) {
        ErrorClass::Connection
    } else {
        ErrorClass::Unknown
    }
}

fn contains_any(message: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| message.contains(needle))
}

fn is_missing_path(message: &str) -> bool {
    contains_any(
        message,
        &[
            "path does not exist",
            "no such file or directory",
            "file not found",
            "cannot find path",
            "path not found",
        ],
    )
}

fn is_corrupt_storage(message: &str) -> bool {
    contains_any(
        message,
        &[
            "is not a delta table",
            "failed to merge fields",
            "incompatible format",
            "cannot find delta log",
            "unreadable table metadata",
        ],
    ) || (message.contains("protocol") && message.contains("unsupported"))
        || (message.contains("delta log") && message.contains("error"))
        || (message.contains("transaction log") && message.contains("corrupt"))
}

fn is_schema_mismatch(message: &str) -> bool {
    contains_any(
        message,
        &[
            "schema mismatch",
            "cannot resolve",
            "column not found",
            "mismatched input",
            "incompatible schema",
        ],
    )
}

fn is_timeout(message: &str) -> bool {
    contains_any(
        message,
        &[
            "timeout",
            "timed out",
            "out of memory",
            "resource exhausted",
            "deadline exceeded",
        ],
    ) || mentions_oom(message)
}

/// `oom` only counts as a word of its own, so "room" or "zoom" stay unclassified.
fn mentions_oom(message: &str) -> bool {
    message
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| matches!(word, "oom" | "oomkilled"))
}

fn is_connection(message: &str) -> bool {
    contains_any(
        message,
        &[
            "connection refused",
            "connection failed",
            "network error",
            "cannot connect",
            "authentication failed",
            "login failed",
            "connection timeout",
        ],
    )
}

/// Message recorded for a table skipped because its definition cannot be used.
pub fn table_definition_message(err: &TableDefinitionError) -> String {
    match err {
        TableDefinitionError::MissingName => "Table definition is missing 'name'".to_string(),
        TableDefinitionError::UnsupportedLoadMode { load_mode, .. } => {
            format!("Unsupported load_mode '{load_mode}'")
        }
        TableDefinitionError::InvalidDeltaTable { delta_table, .. } => {
            format!("Invalid delta_table '{delta_table}', expected 'schema.table'")
        }
        TableDefinitionError::BlankBusinessKey { .. } => {
            "Invalid business_keys: a key column name is blank".to_string()
        }
        TableDefinitionError::DuplicateBusinessKey { key, .. } => {
            format!("Invalid business_keys: '{key}' is listed more than once")
        }
    }
}

/// Shortens `message` to `max_length` characters, appending a truncation marker.
///
/// Messages within the limit are returned unchanged.
pub fn truncate_error_message(message: &str, max_length: usize) -> String {
    match message.char_indices().nth(max_length) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &message[..cut]),
        None => message.to_string(),
    }
}

/// First `max_length` characters of `message`, without a marker.
pub fn truncate_chars(message: &str, max_length: usize) -> &str {
    match message.char_indices().nth(max_length) {
        Some((cut, _)) => &message[..cut],
        None => message,
    }
}
