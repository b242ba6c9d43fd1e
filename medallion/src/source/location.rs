use std::path::PathBuf;

use crate::types::RunTimestamp;

/// Relative location of one table's export for one run.
///
/// Renders `{base_files}/{source}/{yyyy}/{mm}/{dd}/{run_ts}/{table}`, with the date taken from the
/// run timestamp.
pub fn export_path(base_files: &str, source: &str, run_ts: &RunTimestamp, table: &str) -> String {
    let (year, month, day) = run_ts.date_segments();

    format!("{base_files}/{source}/{year}/{month}/{day}/{run_ts}/{table}")
}

/// Maps a run's export coordinates onto a location the [`crate::source::SourceReader`] understands.
pub trait LocationResolver {
    fn resolve(&self, base_files: &str, source: &str, run_ts: &RunTimestamp, table: &str)
    -> String;
}

/// Resolves exports under a directory on the local file system.
#[derive(Debug, Clone)]
pub struct FilesRootResolver {
    root: PathBuf,
}

impl FilesRootResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LocationResolver for FilesRootResolver {
    fn resolve(
        &self,
        base_files: &str,
        source: &str,
        run_ts: &RunTimestamp,
        table: &str,
    ) -> String {
        self.root
            .join(export_path(base_files, source, run_ts, table))
            .to_string_lossy()
            .into_owned()
    }
}
