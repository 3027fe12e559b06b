//! Batch issuance executor.
//!
//! Eligible candidates are split into fixed-size chunks. Every member of a
//! chunk is issued concurrently on a `JoinSet`; the next chunk starts only
//! once the whole chunk has settled. Chunks run in order, completion order
//! inside a chunk is not preserved.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, Utc};
use futures_util::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;
use crate::model::{CredentialTemplate, IssuanceOutcome, IssuerIdentity, ResolvedCandidate};
use crate::pipeline::progress::{ProgressEmitter, ProgressEvent};
use crate::pipeline::resolution::CANCELLED_MESSAGE;
use crate::report::BatchReport;
use crate::services::{IssuanceService, IssueOutcome};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Number of issuance calls in flight at once.
pub const DEFAULT_CHUNK_SIZE: usize = 5;

/// Seconds per credential assumed before anything has been measured.
pub const DEFAULT_SECONDS_PER_ITEM: f64 = 2.0;

const BATCH_ID_SUFFIX_LEN: usize = 8;
const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

// ─────────────────────────────────────────────────────────────────────────────
// PipelineConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning knobs for the issuance stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub assumed_seconds_per_item: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            assumed_seconds_per_item: DEFAULT_SECONDS_PER_ITEM,
        }
    }
}

impl PipelineConfig {
    /// # Errors
    ///
    /// - `AppError::Config` - zero chunk size, or a negative or non-finite
    ///   per-item estimate
    pub fn validate(&self) -> Result<(), AppError> {
        if self.chunk_size == 0 {
            return Err(AppError::Config(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if !self.assumed_seconds_per_item.is_finite() || self.assumed_seconds_per_item < 0.0 {
            return Err(AppError::Config(
                "assumed_seconds_per_item must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns a fresh batch id, `BATCH-<year>-<8 base36 chars>`.
///
/// Ids are random; uniqueness is likely, not guaranteed.
pub fn generate_batch_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..BATCH_ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("BATCH-{}-{}", Utc::now().year(), suffix)
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchExecutor
// ─────────────────────────────────────────────────────────────────────────────

/// Issues one credential per eligible candidate and collects a report.
pub struct BatchExecutor {
    service: Arc<dyn IssuanceService>,
    config: PipelineConfig,
    progress: ProgressEmitter,
    cancel: CancellationToken,
}

impl BatchExecutor {
    /// # Errors
    ///
    /// - `AppError::Config` - `config` fails validation
    pub fn new(service: Arc<dyn IssuanceService>, config: PipelineConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            service,
            config,
            progress: ProgressEmitter::disabled(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressEmitter) -> Self {
        self.progress = progress;
        self
    }

    /// Stops dispatching new chunks once `cancel` fires. In-flight calls are
    /// allowed to settle.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the issuance stage over `candidates`.
    ///
    /// Candidates that are not eligible are left out of the report. Every
    /// eligible candidate ends up in exactly one of `successes` or
    /// `failures`.
    pub async fn execute(
        &self,
        candidates: Vec<ResolvedCandidate>,
        template: &CredentialTemplate,
        issuer: &IssuerIdentity,
    ) -> BatchReport {
        let batch_id = generate_batch_id();
        let eligible: Vec<ResolvedCandidate> =
            candidates.into_iter().filter(|c| c.is_eligible()).collect();
        let total = eligible.len();
        let total_chunks = total.div_ceil(self.config.chunk_size);

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        let mut cancelled = false;

        info!(
            "[ISSUE] Batch {} started: {} eligible candidates in {} chunks",
            batch_id, total, total_chunks
        );

        let mut pending = eligible.into_iter().peekable();
        let mut chunk_number = 0usize;

        while pending.peek().is_some() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                failures.extend(pending.by_ref().map(|candidate| IssuanceOutcome::Failed {
                    candidate,
                    error_message: CANCELLED_MESSAGE.to_string(),
                }));
                break;
            }

            chunk_number += 1;
            let chunk: Vec<ResolvedCandidate> = pending.by_ref().take(self.config.chunk_size).collect();

            for outcome in self.issue_chunk(chunk, template, issuer).await {
                if outcome.is_success() {
                    successes.push(outcome);
                } else {
                    failures.push(outcome);
                }
            }

            let processed = successes.len() + failures.len();
            self.progress.emit(ProgressEvent::Issuance {
                processed,
                total,
                success_count: successes.len(),
                failure_count: failures.len(),
                estimated_remaining_seconds: self.estimate_remaining(
                    clock.elapsed().as_secs_f64(),
                    processed,
                    total,
                ),
            });

            info!(
                "[ISSUE] Batch {} chunk {}/{} done ({} issued, {} failed so far)",
                batch_id,
                chunk_number,
                total_chunks,
                successes.len(),
                failures.len()
            );
        }

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        if cancelled {
            warn!(
                "[ISSUE] Batch {} cancelled after {} of {} chunks",
                batch_id,
                chunk_number,
                total_chunks
            );
        }
        info!(
            "[ISSUE] Batch {} finished: {} issued, {} failed in {}ms",
            batch_id,
            successes.len(),
            failures.len(),
            duration_ms
        );

        BatchReport {
            batch_id,
            successes,
            failures,
            started_at,
            finished_at,
            duration_ms,
            cancelled,
        }
    }

    /// Issues every member of `chunk` concurrently and waits for all of them.
    async fn issue_chunk(
        &self,
        chunk: Vec<ResolvedCandidate>,
        template: &CredentialTemplate,
        issuer: &IssuerIdentity,
    ) -> Vec<IssuanceOutcome> {
        let mut join_set: JoinSet<(usize, IssuanceOutcome)> = JoinSet::new();
        let mut in_flight: HashMap<usize, ResolvedCandidate> = HashMap::with_capacity(chunk.len());

        for (slot, candidate) in chunk.into_iter().enumerate() {
            let service = Arc::clone(&self.service);
            let request = template.for_recipient(recipient_email(&candidate));
            let issuer = issuer.clone();
            in_flight.insert(slot, candidate.clone());

            join_set.spawn(async move {
                let call = AssertUnwindSafe(service.issue(&request, &issuer)).catch_unwind();
                let outcome = match call.await {
                    Ok(Ok(IssueOutcome::Issued(credential))) => IssuanceOutcome::Issued {
                        candidate,
                        credential,
                    },
                    Ok(Ok(IssueOutcome::Rejected(message))) => IssuanceOutcome::Failed {
                        candidate,
                        error_message: message,
                    },
                    Ok(Err(e)) => IssuanceOutcome::Failed {
                        candidate,
                        error_message: e.to_string(),
                    },
                    Err(panic) => IssuanceOutcome::Failed {
                        candidate,
                        error_message: format!("Issuance task failed: {}", panic_message(&*panic)),
                    },
                };
                (slot, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(in_flight.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((slot, outcome)) => {
                    in_flight.remove(&slot);
                    outcomes.push(outcome);
                }
                Err(e) => warn!("[ISSUE] Task join error: {}", e),
            }
        }

        // Tasks that never reported back still count as failures.
        let mut orphans: Vec<(usize, ResolvedCandidate)> = in_flight.into_iter().collect();
        orphans.sort_by_key(|(slot, _)| *slot);
        outcomes.extend(orphans.into_iter().map(|(_, candidate)| IssuanceOutcome::Failed {
            candidate,
            error_message: "Issuance task failed: task did not complete".to_string(),
        }));

        outcomes
    }

    fn estimate_remaining(&self, elapsed_secs: f64, processed: usize, total: usize) -> u64 {
        let per_item = if processed > 0 && elapsed_secs > 0.0 {
            elapsed_secs / processed as f64
        } else {
            self.config.assumed_seconds_per_item
        };
        let remaining = total.saturating_sub(processed);
        (remaining as f64 * per_item).round() as u64
    }
}

fn recipient_email(candidate: &ResolvedCandidate) -> &str {
    candidate
        .recipient_record
        .as_ref()
        .map(|r| r.email.as_str())
        .unwrap_or(&candidate.candidate.email)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateRow, IssuanceRequest, RecipientRecord};
    use crate::services::InMemoryIssuanceService;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn eligible(email: &str) -> ResolvedCandidate {
        ResolvedCandidate::resolved(
            CandidateRow {
                email: email.to_string(),
                name: format!("Name {}", email),
                is_structurally_valid: true,
                structural_errors: vec![],
            },
            RecipientRecord {
                id: format!("rcp-{}", email),
                email: email.to_string(),
                first_name: "F".to_string(),
                last_name: "L".to_string(),
                external_id: None,
                is_verified: true,
            },
        )
    }

    fn issuer() -> IssuerIdentity {
        IssuerIdentity {
            id: "org-9".to_string(),
            name: "Tech Institute".to_string(),
        }
    }

    fn template() -> CredentialTemplate {
        CredentialTemplate::new("Cloud Basics", "badge")
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Tracks the highest number of simultaneous calls.
    #[derive(Default)]
    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl IssuanceService for ConcurrencyProbe {
        fn issue<'a>(
            &'a self,
            request: &'a IssuanceRequest,
            _issuer: &'a IssuerIdentity,
        ) -> BoxFuture<'a, Result<IssueOutcome, AppError>> {
            Box::pin(async move {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(IssueOutcome::Rejected(format!("probe {}", request.recipient_email)))
            })
        }
    }

    /// Panics for one recipient, errors for another, issues nothing.
    struct FaultyService;

    impl IssuanceService for FaultyService {
        fn issue<'a>(
            &'a self,
            request: &'a IssuanceRequest,
            _issuer: &'a IssuerIdentity,
        ) -> BoxFuture<'a, Result<IssueOutcome, AppError>> {
            Box::pin(async move {
                if request.recipient_email == "boom@x.io" {
                    panic!("backend client bug");
                }
                Err(AppError::Backend("issuer quota exceeded".to_string()))
            })
        }
    }

    /// Cancels the batch on its first call, then issues normally.
    struct CancelOnFirstCall {
        inner: InMemoryIssuanceService,
        cancel: CancellationToken,
    }

    impl IssuanceService for CancelOnFirstCall {
        fn issue<'a>(
            &'a self,
            request: &'a IssuanceRequest,
            issuer: &'a IssuerIdentity,
        ) -> BoxFuture<'a, Result<IssueOutcome, AppError>> {
            self.cancel.cancel();
            self.inner.issue(request, issuer)
        }
    }

    #[test]
    fn test_batch_id_format() {
        let id = generate_batch_id();
        let parts: Vec<&str> = id.split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "BATCH");
        assert_eq!(parts[1], Utc::now().year().to_string());
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = PipelineConfig {
            chunk_size: 0,
            ..PipelineConfig::default()
        };
        let err = BatchExecutor::new(Arc::new(InMemoryIssuanceService::new()), config)
            .err()
            .expect("should reject");
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_seven_eligible_two_failing_in_first_chunk() {
        let service = InMemoryIssuanceService::new().rejecting(["c2@x.io", "c4@x.io"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = BatchExecutor::new(Arc::new(service), PipelineConfig::default())
            .unwrap()
            .with_progress(ProgressEmitter::new(tx));

        let candidates: Vec<_> = (1..=7).map(|i| eligible(&format!("c{}@x.io", i))).collect();
        let report = executor.execute(candidates, &template(), &issuer()).await;

        assert_eq!(report.successes.len(), 5);
        assert_eq!(report.failures.len(), 2);
        assert!(!report.cancelled);
        assert!(report.successes.iter().all(IssuanceOutcome::is_success));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            ProgressEvent::Issuance {
                processed,
                total,
                success_count,
                failure_count,
                ..
            } => {
                assert_eq!(*processed, 5);
                assert_eq!(*total, 7);
                assert_eq!(*success_count, 3);
                assert_eq!(*failure_count, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            events[1],
            ProgressEvent::Issuance { processed: 7, estimated_remaining_seconds: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_ineligible_candidates_are_excluded() {
        let executor =
            BatchExecutor::new(Arc::new(InMemoryIssuanceService::new()), PipelineConfig::default())
                .unwrap();

        let mut invalid = eligible("bad");
        invalid.candidate.is_structurally_valid = false;
        let candidates = vec![
            eligible("a@x.io"),
            ResolvedCandidate::failed(eligible("b@x.io").candidate, "Recipient not found"),
            invalid,
            ResolvedCandidate::unresolved(eligible("c@x.io").candidate),
        ];

        let report = executor.execute(candidates, &template(), &issuer()).await;
        assert_eq!(report.successes.len() + report.failures.len(), 1);
        assert_eq!(report.successes[0].candidate().candidate.email, "a@x.io");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor =
            BatchExecutor::new(Arc::new(InMemoryIssuanceService::new()), PipelineConfig::default())
                .unwrap()
                .with_progress(ProgressEmitter::new(tx));

        let report = executor.execute(vec![], &template(), &issuer()).await;
        assert!(report.successes.is_empty());
        assert!(report.failures.is_empty());
        assert!(report.finished_at >= report.started_at);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_chunk_size() {
        let probe = Arc::new(ConcurrencyProbe::default());
        let config = PipelineConfig {
            chunk_size: 3,
            ..PipelineConfig::default()
        };
        let executor = BatchExecutor::new(probe.clone(), config).unwrap();

        let candidates: Vec<_> = (0..8).map(|i| eligible(&format!("p{}@x.io", i))).collect();
        let report = executor.execute(candidates, &template(), &issuer()).await;

        assert_eq!(report.failures.len(), 8);
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
        assert!(probe.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_errors_and_panics_become_failures() {
        let executor = BatchExecutor::new(Arc::new(FaultyService), PipelineConfig::default()).unwrap();

        let candidates = vec![eligible("ok@x.io"), eligible("boom@x.io"), eligible("z@x.io")];
        let report = executor.execute(candidates, &template(), &issuer()).await;

        assert!(report.successes.is_empty());
        assert_eq!(report.failures.len(), 3);

        let message_for = |email: &str| {
            report
                .failures
                .iter()
                .find_map(|o| match o {
                    IssuanceOutcome::Failed {
                        candidate,
                        error_message,
                    } if candidate.candidate.email == email => Some(error_message.clone()),
                    _ => None,
                })
                .expect("failure present")
        };
        assert_eq!(message_for("boom@x.io"), "Issuance task failed: backend client bug");
        assert_eq!(message_for("ok@x.io"), "Backend error: issuer quota exceeded");
    }

    #[tokio::test]
    async fn test_cancel_between_chunks() {
        let cancel = CancellationToken::new();
        let service = Arc::new(CancelOnFirstCall {
            inner: InMemoryIssuanceService::new(),
            cancel: cancel.clone(),
        });
        let config = PipelineConfig {
            chunk_size: 2,
            ..PipelineConfig::default()
        };
        let executor = BatchExecutor::new(service.clone(), config)
            .unwrap()
            .with_cancellation(cancel);

        let candidates: Vec<_> = (0..6).map(|i| eligible(&format!("k{}@x.io", i))).collect();
        let report = executor.execute(candidates, &template(), &issuer()).await;

        // The first chunk settles; nothing after it is dispatched.
        assert!(report.cancelled);
        assert_eq!(report.successes.len(), 2);
        assert_eq!(report.failures.len(), 4);
        assert!(report.failures.iter().all(|o| matches!(
            o,
            IssuanceOutcome::Failed { error_message, .. } if error_message == CANCELLED_MESSAGE
        )));
        assert_eq!(service.inner.issued().await.len(), 2);
    }

    #[tokio::test]
    async fn test_pre_cancelled_batch_dispatches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let service = Arc::new(InMemoryIssuanceService::new());
        let executor = BatchExecutor::new(service.clone(), PipelineConfig::default())
            .unwrap()
            .with_cancellation(cancel);

        let candidates: Vec<_> = (0..3).map(|i| eligible(&format!("n{}@x.io", i))).collect();
        let report = executor.execute(candidates, &template(), &issuer()).await;

        assert!(report.cancelled);
        assert_eq!(report.failures.len(), 3);
        assert!(service.issued().await.is_empty());
    }

    #[test]
    fn test_eta_uses_assumed_rate_before_measurement() {
        let executor =
            BatchExecutor::new(Arc::new(InMemoryIssuanceService::new()), PipelineConfig::default())
                .unwrap();
        assert_eq!(executor.estimate_remaining(0.0, 0, 10), 20);
        assert_eq!(executor.estimate_remaining(5.0, 5, 10), 5);
        assert_eq!(executor.estimate_remaining(5.0, 10, 10), 0);
    }
}
