use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Schema used for Bronze tables when a table does not name one.
pub const DEFAULT_BRONZE_SCHEMA: &str = "bronze";

/// Schema of every Silver table.
pub const DEFAULT_SILVER_SCHEMA: &str = "silver";

/// Date column used to derive year/month partitions when a window table does not name one.
pub const DEFAULT_WINDOW_COLUMN: &str = "Boek_Datum";

/// Default name of the derived partition year column.
pub const DEFAULT_YEAR_COLUMN: &str = "p_year";

/// Default name of the derived partition month column.
pub const DEFAULT_MONTH_COLUMN: &str = "p_month";

const DEFAULT_LOAD_MODE: &str = "snapshot";

const YEAR_MONTH_PARTITIONING: &str = "year_month";

/// Errors raised while resolving a [`TableConfig`] into a [`TableDefinition`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TableDefinitionError {
    /// The table has no name; nothing downstream can be addressed without one.
    #[error("table definition is missing 'name'")]
    MissingName,
    /// The load mode is not one of `snapshot`, `window` or `incremental`.
    #[error("unsupported load_mode '{load_mode}' for table '{table}'")]
    UnsupportedLoadMode { table: String, load_mode: String },
    /// A dotted target that is not a `schema.table` pair.
    #[error("delta_table '{delta_table}' of table '{table}' is not a 'schema.table' name")]
    InvalidDeltaTable { table: String, delta_table: String },
    #[error("table '{table}' has a blank business key column")]
    BlankBusinessKey { table: String },
    #[error("business key '{key}' is listed more than once for table '{table}'")]
    DuplicateBusinessKey { table: String, key: String },
}

/// Flag accepting the loose spellings found in hand-written DAG files.
///
/// `true`, `1`, `"1"`, `"true"` and `"True"` enable a table; anything else disables it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnabledFlag {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl EnabledFlag {
    pub fn is_enabled(&self) -> bool {
        match self {
            EnabledFlag::Bool(value) => *value,
            EnabledFlag::Int(value) => *value == 1,
            EnabledFlag::Text(value) => matches!(value.as_str(), "1" | "true" | "True"),
        }
    }
}

impl Default for EnabledFlag {
    fn default() -> Self {
        EnabledFlag::Bool(true)
    }
}

/// Window extraction settings of a table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Date column the extraction window is based on.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default)]
    pub lookback: Option<u32>,
}

/// Raw partitioning settings of a table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitioningConfig {
    /// Partitioning strategy. Only `year_month` is understood.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_year_col")]
    pub year_col: String,
    #[serde(default = "default_month_col")]
    pub month_col: String,
}

/// Incremental extraction settings of a table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IncrementalConfig {
    /// Source column that drives incremental extraction upstream.
    #[serde(default)]
    pub column: Option<String>,
}

/// Table entry exactly as it appears in a DAG file.
///
/// Use [`TableConfig::resolve`] to obtain the typed [`TableDefinition`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub name: String,
    /// One of `snapshot`, `window` or `incremental`, case-insensitive. Defaults to `snapshot`.
    #[serde(default)]
    pub load_mode: Option<String>,
    /// Ordered columns identifying a business entity; required for Silver merges.
    #[serde(default)]
    pub business_keys: Option<Vec<String>>,
    #[serde(default)]
    pub delta_schema: Option<String>,
    #[serde(default)]
    pub delta_table: Option<String>,
    #[serde(default)]
    pub enabled: EnabledFlag,
    #[serde(default)]
    pub window: Option<WindowConfig>,
    #[serde(default)]
    pub partitioning: Option<PartitioningConfig>,
    #[serde(default)]
    pub incremental: Option<IncrementalConfig>,
}

impl TableConfig {
    /// Creates a minimal table entry, mostly useful in tests.
    pub fn new(name: impl Into<String>, load_mode: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load_mode: Some(load_mode.into()),
            ..Default::default()
        }
    }

    /// Sets the business keys.
    pub fn with_business_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.business_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the table name if it is non-blank.
    pub fn name(&self) -> Option<&str> {
        let name = self.name.trim();
        (!name.is_empty()).then_some(name)
    }

    /// Returns the lower-cased load mode, defaulting to `snapshot`.
    pub fn load_mode_name(&self) -> String {
        self.load_mode
            .as_deref()
            .map(str::trim)
            .filter(|mode| !mode.is_empty())
            .unwrap_or(DEFAULT_LOAD_MODE)
            .to_lowercase()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.is_enabled()
    }

    /// Fully qualified Bronze table name.
    ///
    /// A `delta_table` containing a dot is used verbatim, otherwise the table lands in
    /// `delta_schema` (default `bronze`) under `delta_table` (default the table name).
    pub fn bronze_table_name(&self) -> Result<TableName, TableDefinitionError> {
        let name = self.name().ok_or(TableDefinitionError::MissingName)?;
        let target = self
            .delta_table
            .as_deref()
            .filter(|table| !table.is_empty())
            .unwrap_or(name);

        if target.contains('.') {
            return TableName::parse(target).ok_or_else(|| {
                TableDefinitionError::InvalidDeltaTable {
                    table: name.to_string(),
                    delta_table: target.to_string(),
                }
            });
        }

        let schema = self
            .delta_schema
            .as_deref()
            .filter(|schema| !schema.is_empty())
            .unwrap_or(DEFAULT_BRONZE_SCHEMA);

        Ok(TableName::new(schema, target))
    }

    /// Fully qualified Silver table name.
    ///
    /// A `delta_table` already in the `silver` schema is used verbatim, otherwise `silver.{name}`.
    pub fn silver_table_name(&self) -> Result<TableName, TableDefinitionError> {
        let name = self.name().ok_or(TableDefinitionError::MissingName)?;

        if let Some(table_name) = self
            .delta_table
            .as_deref()
            .and_then(TableName::parse)
            .filter(|table_name| table_name.schema() == DEFAULT_SILVER_SCHEMA)
        {
            return Ok(table_name);
        }

        Ok(TableName::new(DEFAULT_SILVER_SCHEMA, name))
    }

    /// Resolves the raw entry into a typed [`TableDefinition`].
    pub fn resolve(&self) -> Result<TableDefinition, TableDefinitionError> {
        let name = self.name().ok_or(TableDefinitionError::MissingName)?;
        let load_mode = self.resolve_load_mode(name)?;

        Ok(TableDefinition {
            name: name.to_string(),
            load_mode,
            business_keys: self.business_keys.clone().unwrap_or_default(),
            bronze_table: self.bronze_table_name()?,
            silver_table: self.silver_table_name()?,
        })
    }

    fn resolve_load_mode(&self, name: &str) -> Result<LoadMode, TableDefinitionError> {
        let load_mode = self.load_mode_name();

        match load_mode.as_str() {
            "snapshot" => {
                if self.partitioning.is_some() {
                    warn!(table = name, "partitioning is only applied to window tables, ignoring it");
                }
                Ok(LoadMode::Snapshot)
            }
            "incremental" => Ok(LoadMode::Incremental {
                column: self
                    .incremental
                    .as_ref()
                    .and_then(|incremental| incremental.column.clone()),
            }),
            "window" => {
                let column = self.window.as_ref().and_then(|window| window.column.clone());
                let partitioning = self.partitioning.as_ref().and_then(|partitioning| {
                    if partitioning.kind != YEAR_MONTH_PARTITIONING {
                        warn!(
                            table = name,
                            partitioning = %partitioning.kind,
                            "unknown partitioning type, table will not be partitioned"
                        );
                        return None;
                    }

                    Some(Partitioning::YearMonth {
                        source_column: column
                            .clone()
                            .unwrap_or_else(|| DEFAULT_WINDOW_COLUMN.to_string()),
                        year_column: partitioning.year_col.clone(),
                        month_column: partitioning.month_col.clone(),
                    })
                });

                Ok(LoadMode::Window {
                    column,
                    partitioning,
                })
            }
            _ => Err(TableDefinitionError::UnsupportedLoadMode {
                table: name.to_string(),
                load_mode,
            }),
        }
    }
}

/// How a table is extracted upstream and therefore how its Bronze table is maintained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMode {
    /// Full extract every run; Bronze is overwritten.
    Snapshot,
    /// Extract of a date window; Bronze is overwritten, optionally partitioned by year/month.
    Window {
        column: Option<String>,
        partitioning: Option<Partitioning>,
    },
    /// Changed rows only; Bronze is an append-only history.
    Incremental { column: Option<String> },
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Snapshot => "snapshot",
            LoadMode::Window { .. } => "window",
            LoadMode::Incremental { .. } => "incremental",
        }
    }

    pub fn is_incremental(&self) -> bool {
        matches!(self, LoadMode::Incremental { .. })
    }

    /// Returns the partitioning of a window table.
    pub fn partitioning(&self) -> Option<&Partitioning> {
        match self {
            LoadMode::Window { partitioning, .. } => partitioning.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partitioning of a window table's Bronze output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partitioning {
    /// Year and month integer columns derived from `source_column`.
    YearMonth {
        source_column: String,
        year_column: String,
        month_column: String,
    },
}

impl Partitioning {
    /// Names of the partition columns, in partition order.
    pub fn columns(&self) -> Vec<String> {
        match self {
            Partitioning::YearMonth {
                year_column,
                month_column,
                ..
            } => vec![year_column.clone(), month_column.clone()],
        }
    }
}

/// Resolved, immutable description of one table for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub load_mode: LoadMode,
    pub business_keys: Vec<String>,
    pub bronze_table: TableName,
    pub silver_table: TableName,
}

impl TableDefinition {
    /// Checks that every business key column is named once and is not blank.
    ///
    /// An empty key list passes; callers decide whether keys are required.
    pub fn validate_business_keys(&self) -> Result<(), TableDefinitionError> {
        let mut seen = std::collections::HashSet::new();
        for key in &self.business_keys {
            if key.trim().is_empty() {
                return Err(TableDefinitionError::BlankBusinessKey {
                    table: self.name.clone(),
                });
            }
            if !seen.insert(key.as_str()) {
                return Err(TableDefinitionError::DuplicateBusinessKey {
                    table: self.name.clone(),
                    key: key.clone(),
                });
            }
        }

        Ok(())
    }
}

/// A `{schema}.{table}` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Splits a qualified name at its first dot. Returns `None` for unqualified names.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (schema, table) = qualified.split_once('.')?;
        if schema.is_empty() || table.is_empty() {
            return None;
        }

        Some(Self::new(schema, table))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl TryFrom<String> for TableName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TableName::parse(&value).ok_or_else(|| format!("`{value}` is not a schema.table name"))
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.to_string()
    }
}

fn default_year_col() -> String {
    DEFAULT_YEAR_COLUMN.to_string()
}

fn default_month_col() -> String {
    DEFAULT_MONTH_COLUMN.to_string()
}
