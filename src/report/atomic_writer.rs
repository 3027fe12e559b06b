//! Atomic file writer with automatic cleanup on failure.
//!
//! Writes go to a temporary file next to the destination, which replaces the
//! destination on `finish()`. Dropping the writer first removes the
//! temporary file and leaves the destination untouched.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::AppError;

/// Writes one file atomically.
pub struct AtomicFileWriter {
    writer: BufWriter<NamedTempFile>,
    final_path: PathBuf,
}

impl AtomicFileWriter {
    /// Creates a writer targeting `final_path`.
    ///
    /// The temporary file lives in the same directory as `final_path` so the
    /// final rename stays on one filesystem.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the parent directory cannot be
    /// determined or the temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = match final_path.parent() {
            Some(p) if p.as_os_str().is_empty() => Path::new("."),
            Some(p) => p,
            None => {
                return Err(AppError::Storage(format!(
                    "Cannot determine parent directory for: {}",
                    final_path.display()
                )))
            }
        };

        let temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|e| AppError::Storage(format!("Failed to create temporary file: {}", e)))?;

        Ok(Self {
            writer: BufWriter::new(temp_file),
            final_path,
        })
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), AppError> {
        self.writer
            .write_all(bytes)
            .map_err(|e| AppError::Storage(format!("Failed to write temporary file: {}", e)))
    }

    /// Flushes and moves the file into place, returning its final path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if flushing or persisting fails. The
    /// temporary file is removed on error.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let named_temp = self
            .writer
            .into_inner()
            .map_err(|e| AppError::Storage(format!("Failed to flush buffer: {}", e.error())))?;

        named_temp.persist(&self.final_path).map_err(|e| {
            AppError::Storage(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}

/// Writes `contents` to `path` atomically.
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<PathBuf, AppError> {
    let mut writer = AtomicFileWriter::new(path)?;
    writer.write_all(contents)?;
    writer.finish()
}
