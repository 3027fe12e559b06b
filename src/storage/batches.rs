//! Batch history persistence for SQLite.
//!
//! Every executed batch is stored with one row per eligible candidate, so a
//! report can be listed, inspected and re-exported after the process that
//! ran it is gone.

use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::model::{IssuanceOutcome, IssuerIdentity};
use crate::report::batch_report::{csv_artifacts, failure_csv, success_csv};
use crate::report::{BatchReport, ReportArtifact};
use crate::storage::database::{open_connection, Database};

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Summary row of one stored batch. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRunRow {
    pub batch_id: String,
    pub issuer_id: String,
    pub issuer_name: String,
    pub template_title: String,
    pub total: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub success_rate: f64,
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_ms: i64,
    pub cancelled: bool,
    pub created_at: i64,
}

/// One eligible candidate of a stored batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcomeRow {
    /// Position within the report: successes first, then failures.
    pub position: i64,
    pub email: String,
    pub name: String,
    pub succeeded: bool,
    pub credential_id: Option<String>,
    pub error_message: Option<String>,
}

/// A stored batch with all its outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRunWithOutcomes {
    pub run: BatchRunRow,
    pub outcomes: Vec<BatchOutcomeRow>,
}

impl BatchRunWithOutcomes {
    /// Rebuilds the report CSVs, byte-identical to the ones exported when the
    /// batch ran.
    pub fn artifacts(&self) -> Vec<ReportArtifact> {
        let successes = self
            .outcomes
            .iter()
            .filter(|o| o.succeeded)
            .map(|o| {
                (
                    o.email.as_str(),
                    o.name.as_str(),
                    o.credential_id.as_deref().unwrap_or_default(),
                )
            });
        let failures = self
            .outcomes
            .iter()
            .filter(|o| !o.succeeded)
            .map(|o| {
                (
                    o.email.as_str(),
                    o.name.as_str(),
                    o.error_message.as_deref().unwrap_or_default(),
                )
            });

        csv_artifacts(&self.run.batch_id, success_csv(successes), failure_csv(failures))
    }
}

fn outcome_row(position: usize, outcome: &IssuanceOutcome) -> BatchOutcomeRow {
    let candidate = &outcome.candidate().candidate;
    let (credential_id, error_message) = match outcome {
        IssuanceOutcome::Issued { credential, .. } => (Some(credential.id.clone()), None),
        IssuanceOutcome::Failed { error_message, .. } => (None, Some(error_message.clone())),
    };
    BatchOutcomeRow {
        position: position as i64,
        email: candidate.email.clone(),
        name: candidate.name.clone(),
        succeeded: outcome.is_success(),
        credential_id,
        error_message,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────────────────────────

/// Stores `report` with its outcomes in a single transaction.
pub async fn save_batch_report(
    db: &Database,
    report: &BatchReport,
    issuer: &IssuerIdentity,
    template_title: &str,
) -> Result<(), AppError> {
    let db_path = db.db_path().clone();
    let run = BatchRunRow {
        batch_id: report.batch_id.clone(),
        issuer_id: issuer.id.clone(),
        issuer_name: issuer.name.clone(),
        template_title: template_title.to_string(),
        total: report.total() as i64,
        success_count: report.successes.len() as i64,
        failure_count: report.failures.len() as i64,
        success_rate: report.success_rate(),
        started_at: report.started_at.timestamp_millis(),
        finished_at: report.finished_at.timestamp_millis(),
        duration_ms: report.duration_ms as i64,
        cancelled: report.cancelled,
        created_at: Utc::now().timestamp_millis(),
    };
    let outcomes: Vec<BatchOutcomeRow> = report
        .successes
        .iter()
        .chain(report.failures.iter())
        .enumerate()
        .map(|(i, o)| outcome_row(i, o))
        .collect();
    let batch_id = run.batch_id.clone();
    let outcome_count = outcomes.len();

    tokio::task::spawn_blocking(move || {
        let mut conn = open_connection(&db_path)?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Storage(format!("Failed to start transaction: {e}")))?;

        tx.execute(
            r#"
            INSERT INTO batch_runs (batch_id, issuer_id, issuer_name, template_title, total, success_count, failure_count, success_rate, started_at, finished_at, duration_ms, cancelled, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            rusqlite::params![
                run.batch_id,
                run.issuer_id,
                run.issuer_name,
                run.template_title,
                run.total,
                run.success_count,
                run.failure_count,
                run.success_rate,
                run.started_at,
                run.finished_at,
                run.duration_ms,
                run.cancelled,
                run.created_at,
            ],
        )
        .map_err(|e| AppError::Storage(format!("Failed to insert batch run: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO batch_outcomes (batch_id, position, email, name, succeeded, credential_id, error_message)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                )
                .map_err(|e| AppError::Storage(format!("Failed to prepare insert: {e}")))?;

            for outcome in &outcomes {
                stmt.execute(rusqlite::params![
                    run.batch_id,
                    outcome.position,
                    outcome.email,
                    outcome.name,
                    outcome.succeeded,
                    outcome.credential_id,
                    outcome.error_message,
                ])
                .map_err(|e| AppError::Storage(format!("Failed to insert outcome: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| AppError::Storage(format!("Failed to commit batch: {e}")))?;

        Ok::<_, AppError>(())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Save batch task failed: {e}")))??;

    info!(
        "[STORE] Saved batch {} with {} outcomes",
        batch_id, outcome_count
    );
    Ok(())
}

/// Loads one stored batch with its outcomes in report order.
///
/// # Errors
///
/// - `AppError::NotFound` - no batch with this id
pub async fn get_batch(db: &Database, batch_id: &str) -> Result<BatchRunWithOutcomes, AppError> {
    let db_path = db.db_path().clone();
    let batch_id = batch_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = open_connection(&db_path)?;

        let run = conn
            .query_row(
                &format!("{} WHERE batch_id = ?1", SELECT_RUN),
                [&batch_id],
                map_run_row,
            )
            .optional()
            .map_err(|e| AppError::Storage(format!("Failed to query batch: {e}")))?
            .ok_or_else(|| AppError::NotFound(format!("Batch {}", batch_id)))?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT position, email, name, succeeded, credential_id, error_message
                FROM batch_outcomes
                WHERE batch_id = ?1
                ORDER BY position ASC
                "#,
            )
            .map_err(|e| AppError::Storage(format!("Failed to prepare query: {e}")))?;

        let outcomes = stmt
            .query_map([&batch_id], |row| {
                Ok(BatchOutcomeRow {
                    position: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    succeeded: row.get(3)?,
                    credential_id: row.get(4)?,
                    error_message: row.get(5)?,
                })
            })
            .map_err(|e| AppError::Storage(format!("Failed to query outcomes: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Storage(format!("Failed to collect outcomes: {e}")))?;

        Ok::<_, AppError>(BatchRunWithOutcomes { run, outcomes })
    })
    .await
    .map_err(|e| AppError::Internal(format!("Get batch task failed: {e}")))?
}

/// Lists the most recent `limit` batches, newest first.
pub async fn list_batches(db: &Database, limit: u32) -> Result<Vec<BatchRunRow>, AppError> {
    let db_path = db.db_path().clone();

    tokio::task::spawn_blocking(move || {
        let conn = open_connection(&db_path)?;

        let mut stmt = conn
            .prepare(&format!(
                "{} ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                SELECT_RUN
            ))
            .map_err(|e| AppError::Storage(format!("Failed to prepare query: {e}")))?;

        let runs = stmt
            .query_map([limit], map_run_row)
            .map_err(|e| AppError::Storage(format!("Failed to query batches: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Storage(format!("Failed to collect batches: {e}")))?;

        Ok::<_, AppError>(runs)
    })
    .await
    .map_err(|e| AppError::Internal(format!("List batches task failed: {e}")))?
}

const SELECT_RUN: &str = r#"
SELECT batch_id, issuer_id, issuer_name, template_title, total, success_count, failure_count, success_rate, started_at, finished_at, duration_ms, cancelled, created_at
FROM batch_runs
"#;

fn map_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BatchRunRow> {
    Ok(BatchRunRow {
        batch_id: row.get(0)?,
        issuer_id: row.get(1)?,
        issuer_name: row.get(2)?,
        template_title: row.get(3)?,
        total: row.get(4)?,
        success_count: row.get(5)?,
        failure_count: row.get(6)?,
        success_rate: row.get(7)?,
        started_at: row.get(8)?,
        finished_at: row.get(9)?,
        duration_ms: row.get(10)?,
        cancelled: row.get(11)?,
        created_at: row.get(12)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateRow, CredentialRecord, RecipientRecord, ResolvedCandidate};
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path: PathBuf = temp_dir.path().join("test.db");
        let db = Database::init(db_path).await.expect("Failed to init database");
        (temp_dir, db)
    }

    fn candidate(email: &str, name: &str) -> ResolvedCandidate {
        ResolvedCandidate::resolved(
            CandidateRow {
                email: email.to_string(),
                name: name.to_string(),
                is_structurally_valid: true,
                structural_errors: vec![],
            },
            RecipientRecord {
                id: "r".to_string(),
                email: email.to_string(),
                first_name: String::new(),
                last_name: String::new(),
                external_id: None,
                is_verified: true,
            },
        )
    }

    fn report(batch_id: &str) -> BatchReport {
        let now = Utc::now();
        BatchReport {
            batch_id: batch_id.to_string(),
            successes: vec![IssuanceOutcome::Issued {
                candidate: candidate("ada@uni.edu", "Ada"),
                credential: CredentialRecord {
                    id: "CRED-0001".to_string(),
                    title: "Algorithms".to_string(),
                    credential_type: "certificate".to_string(),
                    recipient_email: "ada@uni.edu".to_string(),
                    issuer_id: "org-1".to_string(),
                    issuer_name: "Uni".to_string(),
                    issued_at: now,
                    proof: None,
                },
            }],
            failures: vec![IssuanceOutcome::Failed {
                candidate: candidate("bob@uni.edu", "Bob"),
                error_message: "Recipient already holds this credential".to_string(),
            }],
            started_at: now,
            finished_at: now,
            duration_ms: 42,
            cancelled: false,
        }
    }

    fn issuer() -> IssuerIdentity {
        IssuerIdentity {
            id: "org-1".to_string(),
            name: "Uni".to_string(),
        }
    }

    #[tokio::test]
    async fn save_and_get_batch() {
        let (_temp_dir, db) = test_db().await;
        let report = report("BATCH-2026-AAAA0001");

        save_batch_report(&db, &report, &issuer(), "Algorithms")
            .await
            .expect("save should succeed");

        let stored = get_batch(&db, "BATCH-2026-AAAA0001")
            .await
            .expect("get should succeed");

        assert_eq!(stored.run.total, 2);
        assert_eq!(stored.run.success_count, 1);
        assert_eq!(stored.run.failure_count, 1);
        assert_eq!(stored.run.success_rate, 0.5);
        assert_eq!(stored.run.duration_ms, 42);
        assert_eq!(stored.run.template_title, "Algorithms");
        assert!(!stored.run.cancelled);

        assert_eq!(stored.outcomes.len(), 2);
        assert!(stored.outcomes[0].succeeded);
        assert_eq!(stored.outcomes[0].credential_id.as_deref(), Some("CRED-0001"));
        assert!(!stored.outcomes[1].succeeded);
        assert_eq!(stored.outcomes[1].email, "bob@uni.edu");
    }

    #[tokio::test]
    async fn stored_artifacts_match_original() {
        let (_temp_dir, db) = test_db().await;
        let report = report("BATCH-2026-AAAA0002");
        save_batch_report(&db, &report, &issuer(), "Algorithms")
            .await
            .unwrap();

        let stored = get_batch(&db, "BATCH-2026-AAAA0002").await.unwrap();
        assert_eq!(stored.artifacts(), report.artifacts());
    }

    #[tokio::test]
    async fn get_missing_batch_is_not_found() {
        let (_temp_dir, db) = test_db().await;

        let err = get_batch(&db, "BATCH-2026-NOPE0000")
            .await
            .expect_err("should be missing");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_batch_id_is_rejected_atomically() {
        let (_temp_dir, db) = test_db().await;
        let report = report("BATCH-2026-AAAA0003");
        save_batch_report(&db, &report, &issuer(), "Algorithms")
            .await
            .unwrap();

        let err = save_batch_report(&db, &report, &issuer(), "Algorithms")
            .await
            .expect_err("duplicate should fail");
        assert!(matches!(err, AppError::Storage(_)));

        let stored = get_batch(&db, "BATCH-2026-AAAA0003").await.unwrap();
        assert_eq!(stored.outcomes.len(), 2);
    }

    #[tokio::test]
    async fn list_batches_newest_first() {
        let (_temp_dir, db) = test_db().await;
        for id in ["BATCH-2026-00000001", "BATCH-2026-00000002", "BATCH-2026-00000003"] {
            save_batch_report(&db, &report(id), &issuer(), "Algorithms")
                .await
                .unwrap();
        }

        let runs = list_batches(&db, 2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].batch_id, "BATCH-2026-00000003");
        assert_eq!(runs[1].batch_id, "BATCH-2026-00000002");
    }
}
