//! Destinations for report artifacts.

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use tracing::info;

use crate::error::AppError;
use crate::report::atomic_writer::write_atomic;
use crate::report::batch_report::{BatchReport, ReportArtifact};

/// Accepts finished report artifacts.
pub trait ArtifactSink: Send + Sync {
    /// Stores one artifact and returns where it ended up.
    fn store<'a>(&'a self, artifact: &'a ReportArtifact) -> BoxFuture<'a, Result<PathBuf, AppError>>;
}

/// Writes artifacts as files in one directory, creating it on demand.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for DirectorySink {
    fn store<'a>(&'a self, artifact: &'a ReportArtifact) -> BoxFuture<'a, Result<PathBuf, AppError>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
                AppError::Storage(format!(
                    "Failed to create report directory {}: {}",
                    self.dir.display(),
                    e
                ))
            })?;

            let path = self.dir.join(&artifact.file_name);
            let contents = artifact.contents.clone().into_bytes();

            tokio::task::spawn_blocking(move || write_atomic(&path, &contents))
                .await
                .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?
        })
    }
}

/// Stores every artifact of `report` in `sink`, in order.
pub async fn export_report(
    sink: &dyn ArtifactSink,
    report: &BatchReport,
) -> Result<Vec<PathBuf>, AppError> {
    let mut paths = Vec::new();
    for artifact in report.artifacts() {
        paths.push(sink.store(&artifact).await?);
    }
    info!(
        "[REPORT] Exported {} artifacts for batch {}",
        paths.len(),
        report.batch_id
    );
    Ok(paths)
}
