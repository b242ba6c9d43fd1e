use std::future::Future;

use crate::error::MedallionResult;
use crate::types::RowSet;

/// Rows of one export file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Location of the file, recorded in `_bronze_filename`.
    pub path: String,
    pub rows: RowSet,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, rows: RowSet) -> Self {
        Self {
            path: path.into(),
            rows,
        }
    }
}

/// Reads the data files of an export location.
pub trait SourceReader {
    /// Returns every data file under `location`, in file-name order.
    ///
    /// A location that does not exist, or holds no data files, fails with an error whose message
    /// contains "Path does not exist".
    fn read_files(
        &self,
        location: &str,
    ) -> impl Future<Output = MedallionResult<Vec<SourceFile>>> + Send;
}
