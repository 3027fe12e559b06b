//! Batch history commands.

use tracing::info;

use crate::error::AppError;
use crate::state::AppState;
use crate::storage::{get_batch, list_batches, BatchRunRow, BatchRunWithOutcomes};

/// Default number of batches returned by [`list_batch_history`].
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Lists stored batches, newest first.
pub async fn list_batch_history(
    state: &AppState,
    limit: Option<u32>,
) -> Result<Vec<BatchRunRow>, AppError> {
    let runs = list_batches(&state.db, limit.unwrap_or(DEFAULT_HISTORY_LIMIT)).await?;
    info!("[BULK] Listed {} stored batches", runs.len());
    Ok(runs)
}

/// Loads one stored batch with every outcome.
pub async fn get_batch_history(
    state: &AppState,
    batch_id: &str,
) -> Result<BatchRunWithOutcomes, AppError> {
    get_batch(&state.db, batch_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::bulk::{run_bulk_issuance, BulkIssuanceRequest, CsvSource};
    use crate::model::{CredentialTemplate, IssuerIdentity};
    use crate::pipeline::{PipelineConfig, ProgressEmitter};
    use crate::services::{InMemoryDirectory, InMemoryIssuanceService};
    use crate::storage::Database;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_history_after_runs() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::init(temp_dir.path().join("history.db")).await.unwrap();
        let state = AppState::new(
            db,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(InMemoryIssuanceService::new()),
            PipelineConfig::default(),
            temp_dir.path().join("reports"),
        );

        let mut batch_ids = Vec::new();
        for _ in 0..2 {
            let request = BulkIssuanceRequest {
                source: CsvSource::Content("email\nstranger@uni.edu".to_string()),
                template: CredentialTemplate::new("Ethics", "badge"),
                issuer: IssuerIdentity {
                    id: "org-2".to_string(),
                    name: "College".to_string(),
                },
                run_id: None,
                report_dir: None,
            };
            let result = run_bulk_issuance(&state, request, ProgressEmitter::disabled())
                .await
                .unwrap();
            batch_ids.push(result.summary.batch_id);
        }

        let runs = list_batch_history(&state, None).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.total == 0 && r.success_rate == 0.0));

        let stored = get_batch_history(&state, &batch_ids[0]).await.unwrap();
        assert_eq!(stored.run.issuer_name, "College");
        assert!(stored.outcomes.is_empty());

        let err = get_batch_history(&state, "BATCH-0000-XXXXXXXX")
            .await
            .expect_err("should be missing");
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
