//! Bulk issuance commands.
//!
//! Drives one batch through every stage: the recipient file is ingested,
//! candidates are resolved against the Recipient Directory, eligible ones are
//! issued in chunks, and the resulting report is stored and exported as CSV.
//! Each stage is awaited in full before the next begins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::ingest::{ingest_csv, ingest_file, IngestResult};
use crate::model::{CredentialTemplate, IssuerIdentity};
use crate::pipeline::{resolve_candidates, BatchExecutor, ProgressEmitter};
use crate::report::{export_report, ArtifactSink, BatchReport, BatchSummary, DirectorySink};
use crate::state::AppState;
use crate::storage::{get_batch, save_batch_report};

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Where the recipient CSV comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CsvSource {
    /// CSV text already decoded by the caller.
    Content(String),
    /// A UTF-8 file on disk.
    Path(PathBuf),
}

/// Request to run one bulk issuance batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkIssuanceRequest {
    pub source: CsvSource,
    pub template: CredentialTemplate,
    pub issuer: IssuerIdentity,
    /// Id under which the run can be cancelled; generated when absent.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Overrides the configured report directory.
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

/// Row counts from the ingestion stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCounts {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
}

impl From<&IngestResult> for IngestCounts {
    fn from(result: &IngestResult) -> Self {
        Self {
            total_rows: result.total_rows,
            valid_rows: result.valid_rows,
            invalid_rows: result.invalid_rows,
        }
    }
}

/// Outcome of a completed (or cancelled) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkIssuanceResult {
    pub run_id: String,
    pub ingest: IngestCounts,
    /// Candidates the directory resolved.
    pub resolved: usize,
    /// Valid candidates the directory could not resolve.
    pub unresolved: usize,
    pub summary: BatchSummary,
    pub report: BatchReport,
    pub artifact_paths: Vec<PathBuf>,
    /// Set when the report could not be saved to the batch history.
    #[serde(default)]
    pub storage_error: Option<String>,
    /// Set when the report CSVs could not be written.
    #[serde(default)]
    pub export_error: Option<String>,
}

impl BulkIssuanceResult {
    /// True when the report was both stored and exported.
    pub fn is_complete(&self) -> bool {
        self.storage_error.is_none() && self.export_error.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation Token Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Storage for cancellation tokens, keyed by run id.
pub struct CancellationTokens {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancellationTokens {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a fresh token for `run_id`. Returns `None` if the id is
    /// already in use.
    pub async fn register(&self, run_id: &str) -> Option<CancellationToken> {
        let mut guard = self.tokens.lock().await;
        if guard.contains_key(run_id) {
            return None;
        }
        let token = CancellationToken::new();
        guard.insert(run_id.to_string(), token.clone());
        Some(token)
    }

    pub async fn get(&self, run_id: &str) -> Option<CancellationToken> {
        self.tokens.lock().await.get(run_id).cloned()
    }

    pub async fn remove(&self, run_id: &str) {
        self.tokens.lock().await.remove(run_id);
    }
}

impl Default for CancellationTokens {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Ingests a recipient CSV without issuing anything.
pub fn preview_csv(content: &str) -> Result<IngestResult, AppError> {
    ingest_csv(content)
}

/// Runs one batch end to end.
///
/// Item-level problems end up in the report. Failures before issuance
/// (unreadable or malformed CSV, invalid pipeline config) are returned as
/// `Err`. Once issuance has run the report is always returned; storage and
/// export failures are carried in `storage_error` and `export_error`.
pub async fn run_bulk_issuance(
    state: &AppState,
    request: BulkIssuanceRequest,
    progress: ProgressEmitter,
) -> Result<BulkIssuanceResult, AppError> {
    let run_id = request
        .run_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let cancel = state
        .cancel_tokens
        .register(&run_id)
        .await
        .ok_or_else(|| AppError::Internal(format!("Run {} is already in progress", run_id)))?;

    info!("[BULK] Run {} started", run_id);
    let result = execute_run(state, &run_id, request, progress, cancel).await;
    state.cancel_tokens.remove(&run_id).await;

    match &result {
        Ok(r) => info!(
            "[BULK] Run {} finished: batch {} ({}/{} issued)",
            run_id, r.summary.batch_id, r.summary.success_count, r.summary.total
        ),
        Err(e) => warn!("[BULK] Run {} failed: {}", run_id, e),
    }
    result
}

/// Requests cancellation of a running batch.
///
/// # Errors
///
/// - `AppError::NotFound` - no run with this id is in progress
pub async fn cancel_bulk_issuance(state: &AppState, run_id: &str) -> Result<(), AppError> {
    let token = state
        .cancel_tokens
        .get(run_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Run {}", run_id)))?;

    token.cancel();
    info!("[BULK] Cancellation requested for run {}", run_id);
    Ok(())
}

/// Writes the CSVs of a stored batch to `dir`, or to the configured report
/// directory.
pub async fn export_batch(
    state: &AppState,
    batch_id: &str,
    dir: Option<PathBuf>,
) -> Result<Vec<PathBuf>, AppError> {
    let stored = get_batch(&state.db, batch_id).await?;
    let sink = DirectorySink::new(dir.unwrap_or_else(|| state.report_dir.clone()));

    let mut paths = Vec::new();
    for artifact in stored.artifacts() {
        paths.push(sink.store(&artifact).await?);
    }
    info!("[BULK] Re-exported batch {} to {}", batch_id, sink.dir().display());
    Ok(paths)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal
// ─────────────────────────────────────────────────────────────────────────────

async fn execute_run(
    state: &AppState,
    run_id: &str,
    request: BulkIssuanceRequest,
    progress: ProgressEmitter,
    cancel: CancellationToken,
) -> Result<BulkIssuanceResult, AppError> {
    let BulkIssuanceRequest {
        source,
        template,
        issuer,
        report_dir,
        ..
    } = request;

    // Fail fast on bad configuration before any lookup happens.
    let executor = BatchExecutor::new(Arc::clone(&state.issuance), state.pipeline.clone())?
        .with_progress(progress.clone())
        .with_cancellation(cancel.clone());

    let ingested = match source {
        CsvSource::Content(content) => ingest_csv(&content)?,
        CsvSource::Path(path) => ingest_file(&path).await?,
    };
    let ingest = IngestCounts::from(&ingested);

    let resolved = resolve_candidates(
        state.directory.as_ref(),
        ingested.candidates,
        &progress,
        &cancel,
    )
    .await;
    let resolved_count = resolved.iter().filter(|r| r.is_resolved).count();
    let unresolved = resolved
        .iter()
        .filter(|r| r.candidate.is_structurally_valid && !r.is_resolved)
        .count();

    let report = executor.execute(resolved, &template, &issuer).await;

    // Credentials are already issued past this point; keep the report.
    let storage_error = match save_batch_report(&state.db, &report, &issuer, &template.title).await {
        Ok(()) => None,
        Err(e) => {
            warn!("[BULK] Run {} could not store batch {}: {}", run_id, report.batch_id, e);
            Some(e.to_string())
        }
    };

    let sink = DirectorySink::new(report_dir.unwrap_or_else(|| state.report_dir.clone()));
    let (artifact_paths, export_error) = match export_report(&sink, &report).await {
        Ok(paths) => (paths, None),
        Err(e) => {
            warn!("[BULK] Run {} could not export batch {}: {}", run_id, report.batch_id, e);
            (Vec::new(), Some(e.to_string()))
        }
    };

    info!(
        "[BULK] Run {} wrote {} artifacts for batch {}",
        run_id,
        artifact_paths.len(),
        report.batch_id
    );

    Ok(BulkIssuanceResult {
        run_id: run_id.to_string(),
        ingest,
        resolved: resolved_count,
        unresolved,
        summary: report.summary(),
        report,
        artifact_paths,
        storage_error,
        export_error,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
