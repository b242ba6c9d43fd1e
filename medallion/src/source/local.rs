use std::path::Path;

use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, MedallionResult};
use crate::medallion_error;
use crate::source::base::{SourceFile, SourceReader};
use crate::types::{Cell, RowSet};

/// Data file formats understood by [`LocalFileReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataFormat {
    Parquet,
    JsonLines,
}

impl DataFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "parquet" => Some(DataFormat::Parquet),
            "jsonl" | "ndjson" => Some(DataFormat::JsonLines),
            _ => None,
        }
    }
}

/// Reads `*.parquet`, `*.jsonl` and `*.ndjson` files from a local directory.
///
/// Other files in the directory, such as `_SUCCESS` markers, are ignored.
#[derive(Debug, Clone, Default)]
pub struct LocalFileReader;

impl LocalFileReader {
    pub fn new() -> Self {
        Self
    }
}

impl SourceReader for LocalFileReader {
    async fn read_files(&self, location: &str) -> MedallionResult<Vec<SourceFile>> {
        let mut entries = match tokio::fs::read_dir(location).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                bail!(ErrorKind::SourcePathMissing, "Path does not exist", location);
            }
            Err(err) => return Err(err.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && DataFormat::from_path(&path).is_some() {
                paths.push(path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            bail!(
                ErrorKind::SourcePathMissing,
                "Path does not exist",
                format!("{location} contains no data files")
            );
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let file_name = path.to_string_lossy().into_owned();
            let rows = tokio::task::spawn_blocking(move || read_data_file(&path))
                .await
                .map_err(|_| {
                    medallion_error!(ErrorKind::SourceIoError, "Source file reader panicked")
                })??;

            debug!(file = %file_name, rows = rows.len(), "read source file");
            files.push(SourceFile::new(file_name, rows));
        }

        Ok(files)
    }
}

fn read_data_file(path: &Path) -> MedallionResult<RowSet> {
    match DataFormat::from_path(path) {
        Some(DataFormat::Parquet) => read_parquet(path),
        Some(DataFormat::JsonLines) => read_json_lines(path),
        None => bail!(
            ErrorKind::UnsupportedFileFormat,
            "Unsupported source file format",
            path.display()
        ),
    }
}

#[cfg(feature = "parquet")]
fn read_parquet(path: &Path) -> MedallionResult<RowSet> {
    crate::source::parquet_file::read_parquet_file(path)
}

#[cfg(not(feature = "parquet"))]
fn read_parquet(path: &Path) -> MedallionResult<RowSet> {
    bail!(
        ErrorKind::UnsupportedFileFormat,
        "Parquet support is not enabled",
        path.display()
    )
}

fn read_json_lines(path: &Path) -> MedallionResult<RowSet> {
    let contents = std::fs::read_to_string(path)?;

    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)
            .map_err(|err| {
                medallion_error!(
                    ErrorKind::DeserializationError,
                    "Invalid JSON line in source file",
                    format!("{}:{}: {err}", path.display(), index + 1)
                )
            })?;
        records.push(
            object
                .into_iter()
                .map(|(name, value)| (name, Cell::from(value)))
                .collect::<Vec<_>>(),
        );
    }

    Ok(RowSet::from_records(records))
}
