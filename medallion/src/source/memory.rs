use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, MedallionResult};
use crate::source::base::{SourceFile, SourceReader};

#[derive(Debug)]
struct Inner {
    locations: HashMap<String, Vec<SourceFile>>,
}

/// In-memory export locations for tests.
#[derive(Debug, Clone)]
pub struct MemorySourceReader {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySourceReader {
    pub fn new() -> Self {
        let inner = Inner {
            locations: HashMap::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Registers the files of a location, replacing earlier ones.
    pub async fn insert_files(&self, location: impl Into<String>, files: Vec<SourceFile>) {
        let mut inner = self.inner.lock().await;
        inner.locations.insert(location.into(), files);
    }
}

impl Default for MemorySourceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader for MemorySourceReader {
    async fn read_files(&self, location: &str) -> MedallionResult<Vec<SourceFile>> {
        let inner = self.inner.lock().await;

        match inner.locations.get(location) {
            Some(files) if !files.is_empty() => {
                let mut files = files.clone();
                files.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(files)
            }
            _ => bail!(ErrorKind::SourcePathMissing, "Path does not exist", location),
        }
    }
}
