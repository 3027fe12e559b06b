//! Batch report: the aggregated outcome of one issuance run and the CSV
//! artifacts offered for offline remediation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::IssuanceOutcome;

pub const CSV_MIME_TYPE: &str = "text/csv";

const SUCCESS_HEADER: &str = "email,name,credential_id";
const FAILURE_HEADER: &str = "email,name,error";

/// Outcome of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// `BATCH-<year>-<suffix>`.
    pub batch_id: String,
    /// Every entry is `IssuanceOutcome::Issued`.
    pub successes: Vec<IssuanceOutcome>,
    /// Every entry is `IssuanceOutcome::Failed`.
    pub failures: Vec<IssuanceOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// True when the run stopped early; undispatched candidates are in
    /// `failures`.
    #[serde(default)]
    pub cancelled: bool,
}

/// A named, MIME-typed file produced from a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub contents: String,
}

/// Counts and timing of a report, without the outcome lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub duration_ms: u64,
    pub cancelled: bool,
}

impl BatchReport {
    /// Number of eligible candidates the batch accounted for.
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// Fraction of issued credentials, in `[0, 1]`; 0 for an empty batch.
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.successes.len() as f64 / total as f64,
        }
    }

    /// `email,name,credential_id` rows for every issued credential.
    pub fn success_csv(&self) -> String {
        success_csv(self.successes.iter().filter_map(|outcome| match outcome {
            IssuanceOutcome::Issued {
                candidate,
                credential,
            } => Some((
                candidate.candidate.email.as_str(),
                candidate.candidate.name.as_str(),
                credential.id.as_str(),
            )),
            IssuanceOutcome::Failed { .. } => None,
        }))
    }

    /// `email,name,error` rows for every failure. Only the error is quoted.
    pub fn failure_csv(&self) -> String {
        failure_csv(self.failures.iter().filter_map(|outcome| match outcome {
            IssuanceOutcome::Failed {
                candidate,
                error_message,
            } => Some((
                candidate.candidate.email.as_str(),
                candidate.candidate.name.as_str(),
                error_message.as_str(),
            )),
            IssuanceOutcome::Issued { .. } => None,
        }))
    }

    /// The success and failure CSVs, named after the batch.
    pub fn artifacts(&self) -> Vec<ReportArtifact> {
        csv_artifacts(&self.batch_id, self.success_csv(), self.failure_csv())
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id.clone(),
            total: self.total(),
            success_count: self.successes.len(),
            failure_count: self.failures.len(),
            success_rate: self.success_rate(),
            duration_ms: self.duration_ms,
            cancelled: self.cancelled,
        }
    }
}

/// Joins `(email, name, credential_id)` triples under the success header.
pub fn success_csv<'a>(rows: impl Iterator<Item = (&'a str, &'a str, &'a str)>) -> String {
    join_with_header(
        SUCCESS_HEADER,
        rows.map(|(email, name, id)| format!("{},{},{}", email, name, id)),
    )
}

/// Joins `(email, name, error)` triples under the failure header.
pub fn failure_csv<'a>(rows: impl Iterator<Item = (&'a str, &'a str, &'a str)>) -> String {
    join_with_header(
        FAILURE_HEADER,
        rows.map(|(email, name, error)| format!("{},{},\"{}\"", email, name, error)),
    )
}

/// Wraps the two CSV bodies of batch `batch_id` as artifacts.
pub fn csv_artifacts(batch_id: &str, success: String, failure: String) -> Vec<ReportArtifact> {
    vec![
        ReportArtifact {
            file_name: format!("successful_credentials_{}.csv", batch_id),
            mime_type: CSV_MIME_TYPE.to_string(),
            contents: success,
        },
        ReportArtifact {
            file_name: format!("failed_credentials_{}.csv", batch_id),
            mime_type: CSV_MIME_TYPE.to_string(),
            contents: failure,
        },
    ]
}

fn join_with_header(header: &str, rows: impl Iterator<Item = String>) -> String {
    std::iter::once(header.to_string())
        .chain(rows)
        .collect::<Vec<_>>()
        .join("\n")
}
