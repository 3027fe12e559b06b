//! Application state shared by the command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::commands::bulk::CancellationTokens;
use crate::pipeline::PipelineConfig;
use crate::services::{IssuanceService, RecipientDirectory};
use crate::storage::Database;

// ─────────────────────────────────────────────────────────────────────────────
// Application State
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a bulk issuance run needs besides its request.
pub struct AppState {
    /// Batch history.
    pub db: Arc<Database>,
    pub directory: Arc<dyn RecipientDirectory>,
    pub issuance: Arc<dyn IssuanceService>,
    pub pipeline: PipelineConfig,
    /// Default destination of report CSVs.
    pub report_dir: PathBuf,
    /// Tokens of the runs currently in progress, keyed by run id.
    pub cancel_tokens: CancellationTokens,
}

impl AppState {
    pub fn new(
        db: Database,
        directory: Arc<dyn RecipientDirectory>,
        issuance: Arc<dyn IssuanceService>,
        pipeline: PipelineConfig,
        report_dir: PathBuf,
    ) -> Self {
        Self {
            db: Arc::new(db),
            directory,
            issuance,
            pipeline,
            report_dir,
            cancel_tokens: CancellationTokens::new(),
        }
    }
}
