//! Recipient resolution: looks every structurally valid candidate up in the
//! Recipient Directory, one at a time, in file order.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model::{CandidateRow, ResolvedCandidate};
use crate::pipeline::progress::{ProgressEmitter, ProgressEvent};
use crate::services::{LookupOutcome, RecipientDirectory};

/// Error recorded on candidates that were never looked up because the batch
/// was cancelled.
pub const CANCELLED_MESSAGE: &str = "Cancelled";

/// Resolves `candidates` against `directory`.
///
/// Returns exactly one `ResolvedCandidate` per input, in input order. Lookup
/// failures are recorded on the candidate and never stop the loop. Invalid
/// candidates pass through without a lookup.
pub async fn resolve_candidates(
    directory: &dyn RecipientDirectory,
    candidates: Vec<CandidateRow>,
    progress: &ProgressEmitter,
    cancel: &CancellationToken,
) -> Vec<ResolvedCandidate> {
    let total = candidates.len();
    let mut resolved = Vec::with_capacity(total);
    let mut failed = 0usize;

    for (index, candidate) in candidates.into_iter().enumerate() {
        let entry = if !candidate.is_structurally_valid {
            ResolvedCandidate::unresolved(candidate)
        } else if cancel.is_cancelled() {
            ResolvedCandidate::failed(candidate, CANCELLED_MESSAGE)
        } else {
            match directory.lookup(&candidate.email).await {
                Ok(LookupOutcome::Found(record)) => ResolvedCandidate::resolved(candidate, record),
                Ok(LookupOutcome::Rejected(message)) => {
                    failed += 1;
                    ResolvedCandidate::failed(candidate, message)
                }
                Err(e) => {
                    failed += 1;
                    warn!("[RESOLVE] Lookup for row {} failed: {}", index + 1, e);
                    ResolvedCandidate::failed(candidate, e.to_string())
                }
            }
        };

        resolved.push(entry);
        progress.emit(ProgressEvent::Resolution {
            processed: index + 1,
            total,
        });
    }

    let matched = resolved.iter().filter(|r| r.is_resolved).count();
    if cancel.is_cancelled() {
        info!("[RESOLVE] Cancelled after resolving {} of {} candidates", matched, total);
    } else {
        info!(
            "[RESOLVE] Resolved {} of {} candidates ({} lookups failed)",
            matched, total, failed
        );
    }

    resolved
}
