use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading a watermarks file.
#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("watermarks file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read watermarks file `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse watermarks file `{}`: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Extraction cursors published by the upstream extraction pipeline.
///
/// The medallion layers only read these values; they never advance them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Watermarks {
    #[serde(default)]
    pub source: Vec<SourceWatermarks>,
}

/// Cursor values of all tables of one source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceWatermarks {
    pub name: String,
    #[serde(default)]
    pub tables: BTreeMap<String, serde_json::Value>,
}

impl Watermarks {
    pub fn from_path(path: &Path) -> Result<Self, WatermarkError> {
        if !path.is_file() {
            return Err(WatermarkError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|source| WatermarkError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| WatermarkError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns the table cursors of `source`, if the source is known.
    pub fn for_source(&self, source: &str) -> Option<&BTreeMap<String, serde_json::Value>> {
        self.source
            .iter()
            .find(|watermarks| watermarks.name == source)
            .map(|watermarks| &watermarks.tables)
    }

    /// Returns the cursor of one table.
    pub fn for_table(&self, source: &str, table: &str) -> Option<&serde_json::Value> {
        self.for_source(source)?.get(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_table_watermarks() {
        let watermarks: Watermarks = serde_json::from_str(
            r#"{"source": [
                {"name": "vizier", "tables": {"Fact_Mutatie": {"column": "Mut_Datum", "value": "2025-01-31"}}},
                {"name": "anva_concern", "tables": {}}
            ]}"#,
        )
        .unwrap();

        let cursor = watermarks.for_table("vizier", "Fact_Mutatie").unwrap();

        assert_eq!(cursor["value"], "2025-01-31");
        assert!(watermarks.for_table("vizier", "Dim_Relatie").is_none());
        assert!(watermarks.for_source("anva_concern").unwrap().is_empty());
        assert!(watermarks.for_source("unknown").is_none());
    }
}
