//! File-backed property source.
//!
//! Reads and writes a properties-format text file. There is no partial-write
//! primitive: every change is a read-merge-write of the whole file, replaced
//! atomically through a temp file in the same directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{Change, PropertyBackend, Properties, SourceStamp, WriteMode, properties};
use crate::error::{Error, Result};

/// Properties file backend.
///
/// Concurrent writers are serialized by the owning store. Modifications
/// made by other processes while a read-merge-write is in flight are lost.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Opens a backend over an existing properties file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `path` does not exist or is not a
    /// regular file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::configuration(format!(
                "'{}' does not exist or is not a regular file",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Properties> {
        let bytes = fs::read(&self.path)
            .map_err(|e| Error::source_unavailable(self.location(), e))?;
        properties::parse(&properties::decode(&bytes))
            .map_err(|e| Error::source_unavailable(self.location(), e))
    }

    fn write_entries(&self, entries: &Properties) -> std::io::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(properties::serialize(entries, None).as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl PropertyBackend for FileBackend {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn load_all(&self) -> Result<Properties> {
        let entries = self.read_entries()?;
        debug!(path = %self.path.display(), entries = entries.len(), "Read properties file");
        Ok(entries)
    }

    fn apply_change(&self, change: Change<'_>) -> Result<()> {
        let merged = match change.mode {
            WriteMode::Replace => change.entries.clone(),
            WriteMode::Upsert => {
                let mut current = self
                    .read_entries()
                    .map_err(|e| Error::persistence(self.location(), e))?;
                current.extend(
                    change
                        .entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                current
            },
        };

        self.write_entries(&merged)
            .map_err(|e| Error::persistence(self.location(), e))?;

        debug!(
            path = %self.path.display(),
            mode = ?change.mode,
            written = change.entries.len(),
            total = merged.len(),
            "Rewrote properties file"
        );
        Ok(())
    }

    fn stamp(&self) -> Result<SourceStamp> {
        let meta = fs::metadata(&self.path)
            .map_err(|e| Error::source_unavailable(self.location(), e))?;
        let at = meta
            .modified()
            .map_err(|e| Error::source_unavailable(self.location(), e))?;
        Ok(SourceStamp::Modified {
            at,
            len: meta.len(),
        })
    }

    fn has_cheap_stamp(&self) -> bool {
        true
    }
}
