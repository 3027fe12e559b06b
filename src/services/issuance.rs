//! Issuance Service: turns an issuance request into a credential.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{CredentialRecord, IssuanceRequest, IssuerIdentity, PlaceholderProof};
use crate::services::http::BackendClient;

const ISSUE_PATH: &str = "/api/v1/credentials/issue";

/// Answer of an issuance call that reached the service.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    Issued(CredentialRecord),
    /// The service refused to issue, with its message.
    Rejected(String),
}

/// Issues one credential per call. The service assigns credential ids.
pub trait IssuanceService: Send + Sync {
    fn issue<'a>(
        &'a self,
        request: &'a IssuanceRequest,
        issuer: &'a IssuerIdentity,
    ) -> BoxFuture<'a, Result<IssueOutcome, AppError>>;
}

/// Builds a simulated proof. Nothing is anchored anywhere.
pub fn placeholder_proof() -> PlaceholderProof {
    let mut rng = rand::thread_rng();
    let high: u128 = rng.gen();
    let low: u128 = rng.gen();
    PlaceholderProof {
        transaction_hash: format!("0x{:032x}{:032x}", high, low),
        block_number: rng.gen_range(1_000_000..10_000_000),
    }
}

fn new_credential_id() -> String {
    let simple = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("CRED-{}", &simple[..12])
}

// ─────────────────────────────────────────────────────────────────────────────
// InMemoryIssuanceService
// ─────────────────────────────────────────────────────────────────────────────

/// Issuance service that keeps credentials in memory.
///
/// Useful for rehearsing a batch: e-mails in the rejection set are refused
/// the way a real backend refuses a recipient.
#[derive(Debug, Default)]
pub struct InMemoryIssuanceService {
    issued: Mutex<Vec<CredentialRecord>>,
    rejected_emails: HashSet<String>,
    latency: Option<Duration>,
}

impl InMemoryIssuanceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses issuance to each e-mail in `emails` (case-insensitive).
    pub fn rejecting<I, S>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rejected_emails
            .extend(emails.into_iter().map(|e| e.as_ref().to_lowercase()));
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Credentials issued so far, in completion order.
    pub async fn issued(&self) -> Vec<CredentialRecord> {
        self.issued.lock().await.clone()
    }
}

impl IssuanceService for InMemoryIssuanceService {
    fn issue<'a>(
        &'a self,
        request: &'a IssuanceRequest,
        issuer: &'a IssuerIdentity,
    ) -> BoxFuture<'a, Result<IssueOutcome, AppError>> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            let email = request.recipient_email.to_lowercase();
            if self.rejected_emails.contains(&email) {
                return Ok(IssueOutcome::Rejected(format!(
                    "Issuer {} may not issue to this recipient",
                    issuer.name
                )));
            }

            let credential = CredentialRecord {
                id: new_credential_id(),
                title: request.template.title.clone(),
                credential_type: request.template.credential_type.clone(),
                recipient_email: email,
                issuer_id: issuer.id.clone(),
                issuer_name: issuer.name.clone(),
                issued_at: Utc::now(),
                proof: Some(placeholder_proof()),
            };

            self.issued.lock().await.push(credential.clone());
            Ok(IssueOutcome::Issued(credential))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpIssuanceService
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct IssueBody<'a> {
    credential: &'a IssuanceRequest,
    issuer: &'a IssuerIdentity,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    success: bool,
    #[serde(default)]
    credential: Option<CredentialRecord>,
    #[serde(default)]
    error: Option<String>,
}

/// Issuance service provided by the credential backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIssuanceService {
    client: BackendClient,
}

impl HttpIssuanceService {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

impl IssuanceService for HttpIssuanceService {
    fn issue<'a>(
        &'a self,
        request: &'a IssuanceRequest,
        issuer: &'a IssuerIdentity,
    ) -> BoxFuture<'a, Result<IssueOutcome, AppError>> {
        Box::pin(async move {
            let body = IssueBody {
                credential: request,
                issuer,
            };
            let response: IssueResponse = self.client.post_json(ISSUE_PATH, &body).await?;

            Ok(match (response.success, response.credential) {
                (true, Some(credential)) => IssueOutcome::Issued(credential),
                _ => IssueOutcome::Rejected(
                    response
                        .error
                        .unwrap_or_else(|| "Failed to issue credential".to_string()),
                ),
            })
        })
    }
}
