//! Recipient Directory: resolves an e-mail to a known recipient.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::model::RecipientRecord;
use crate::services::http::BackendClient;

/// Path of the lookup endpoint, relative to the backend base URL.
const LOOKUP_PATH: &str = "/api/v1/recipients/lookup";

/// Answer of a directory lookup that reached the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The e-mail belongs to a known recipient.
    Found(RecipientRecord),
    /// The directory answered negatively, with its message.
    Rejected(String),
}

/// Looks recipients up by e-mail.
///
/// Implementations must be idempotent; the pipeline calls `lookup` at most
/// once per candidate.
pub trait RecipientDirectory: Send + Sync {
    fn lookup<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<LookupOutcome, AppError>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// InMemoryDirectory
// ─────────────────────────────────────────────────────────────────────────────

/// Directory backed by a map of lower-cased e-mail to record.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    records: RwLock<HashMap<String, RecipientRecord>>,
    lookups: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = RecipientRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.email.to_lowercase(), r))
            .collect();
        Self {
            records: RwLock::new(map),
            lookups: AtomicUsize::new(0),
        }
    }

    pub async fn insert(&self, record: RecipientRecord) {
        self.records
            .write()
            .await
            .insert(record.email.to_lowercase(), record);
    }

    /// Number of lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl RecipientDirectory for InMemoryDirectory {
    fn lookup<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<LookupOutcome, AppError>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let records = self.records.read().await;
            Ok(match records.get(&email.to_lowercase()) {
                Some(record) => LookupOutcome::Found(record.clone()),
                None => LookupOutcome::Rejected(format!("Recipient not found: {}", email)),
            })
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpRecipientDirectory
// ─────────────────────────────────────────────────────────────────────────────

/// Response body of the lookup endpoint.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    success: bool,
    #[serde(default)]
    record: Option<RecipientRecord>,
    #[serde(default)]
    error: Option<String>,
}

/// Directory served by the credential backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRecipientDirectory {
    client: BackendClient,
}

impl HttpRecipientDirectory {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

impl RecipientDirectory for HttpRecipientDirectory {
    fn lookup<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<LookupOutcome, AppError>> {
        Box::pin(async move {
            let response: LookupResponse = self
                .client
                .get_json(LOOKUP_PATH, &[("email", email)])
                .await?;

            Ok(match (response.success, response.record) {
                (true, Some(record)) => LookupOutcome::Found(record),
                _ => LookupOutcome::Rejected(
                    response
                        .error
                        .unwrap_or_else(|| "Recipient not found".to_string()),
                ),
            })
        })
    }
}
