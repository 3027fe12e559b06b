//! Records that flow through the bulk issuance pipeline.
//!
//! Each stage wraps the previous stage's record instead of mutating it:
//! `CandidateRow` → `ResolvedCandidate` → `IssuanceOutcome`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion / Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// A prospective recipient extracted from one data line of an uploaded CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRow {
    /// Lower-cased e-mail address (may be empty when the row is invalid).
    pub email: String,
    /// Display name, empty when the file has no `name` column.
    pub name: String,
    /// True iff `structural_errors` is empty.
    pub is_structurally_valid: bool,
    /// Row-level validation messages, in the order they were found.
    pub structural_errors: Vec<String>,
}

/// A recipient known to the Recipient Directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientRecord {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}

/// A candidate after the resolution stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCandidate {
    pub candidate: CandidateRow,
    pub is_resolved: bool,
    pub recipient_record: Option<RecipientRecord>,
    pub resolution_error: Option<String>,
}

impl ResolvedCandidate {
    /// Wraps a candidate whose lookup was skipped or has not happened.
    pub fn unresolved(candidate: CandidateRow) -> Self {
        Self {
            candidate,
            is_resolved: false,
            recipient_record: None,
            resolution_error: None,
        }
    }

    /// Wraps a candidate whose lookup failed with `error`.
    pub fn failed(candidate: CandidateRow, error: impl Into<String>) -> Self {
        Self {
            candidate,
            is_resolved: false,
            recipient_record: None,
            resolution_error: Some(error.into()),
        }
    }

    /// Wraps a candidate that the directory resolved to `record`.
    pub fn resolved(candidate: CandidateRow, record: RecipientRecord) -> Self {
        Self {
            candidate,
            is_resolved: true,
            recipient_record: Some(record),
            resolution_error: None,
        }
    }

    /// Structurally valid, resolved, and carrying a record.
    pub fn is_eligible(&self) -> bool {
        self.candidate.is_structurally_valid && self.is_resolved && self.recipient_record.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Issuance
// ─────────────────────────────────────────────────────────────────────────────

/// The organization issuing a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerIdentity {
    pub id: String,
    pub name: String,
}

/// The shared part of every credential in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialTemplate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub credential_type: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CredentialTemplate {
    /// Creates a template with only the required fields set.
    pub fn new(title: impl Into<String>, credential_type: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            credential_type: credential_type.into(),
            skills: Vec::new(),
            expires_at: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Merges the template with one recipient's e-mail.
    pub fn for_recipient(&self, recipient_email: &str) -> IssuanceRequest {
        IssuanceRequest {
            template: self.clone(),
            recipient_email: recipient_email.to_string(),
        }
    }
}

/// A single credential request sent to the Issuance Service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceRequest {
    #[serde(flatten)]
    pub template: CredentialTemplate,
    pub recipient_email: String,
}

/// Simulated verification data attached by the issuance backend.
///
/// These values are display-only placeholders; they are not derived from the
/// credential content and anchor nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderProof {
    pub transaction_hash: String,
    pub block_number: u64,
}

/// A credential as returned by the Issuance Service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub id: String,
    pub title: String,
    pub credential_type: String,
    pub recipient_email: String,
    pub issuer_id: String,
    pub issuer_name: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<PlaceholderProof>,
}

/// Result of issuing to one eligible candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IssuanceOutcome {
    Issued {
        candidate: ResolvedCandidate,
        credential: CredentialRecord,
    },
    Failed {
        candidate: ResolvedCandidate,
        error_message: String,
    },
}

impl IssuanceOutcome {
    pub fn candidate(&self) -> &ResolvedCandidate {
        match self {
            IssuanceOutcome::Issued { candidate, .. } => candidate,
            IssuanceOutcome::Failed { candidate, .. } => candidate,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, IssuanceOutcome::Issued { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(email: &str, valid: bool) -> CandidateRow {
        CandidateRow {
            email: email.to_string(),
            name: "Ada".to_string(),
            is_structurally_valid: valid,
            structural_errors: if valid {
                vec![]
            } else {
                vec!["Invalid email format".to_string()]
            },
        }
    }

    fn record(email: &str) -> RecipientRecord {
        RecipientRecord {
            id: "rcp-1".to_string(),
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            external_id: None,
            is_verified: true,
        }
    }

    #[test]
    fn eligibility_requires_valid_resolved_and_record() {
        assert!(ResolvedCandidate::resolved(row("a@b.io", true), record("a@b.io")).is_eligible());
        assert!(!ResolvedCandidate::unresolved(row("a@b.io", true)).is_eligible());
        assert!(!ResolvedCandidate::failed(row("a@b.io", true), "nope").is_eligible());

        let mut odd = ResolvedCandidate::resolved(row("bad", false), record("bad"));
        assert!(!odd.is_eligible());
        odd.recipient_record = None;
        odd.candidate.is_structurally_valid = true;
        assert!(!odd.is_eligible());
    }

    #[test]
    fn request_merges_template_with_recipient() {
        let mut template = CredentialTemplate::new("Rust Fundamentals", "certificate");
        template.skills = vec!["ownership".to_string()];

        let request = template.for_recipient("ada@uni.edu");
        assert_eq!(request.recipient_email, "ada@uni.edu");
        assert_eq!(request.template, template);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["title"], "Rust Fundamentals");
        assert_eq!(json["credentialType"], "certificate");
        assert_eq!(json["recipientEmail"], "ada@uni.edu");
    }

    #[test]
    fn recipient_record_accepts_minimal_json() {
        let json = r#"{"id":"r1","email":"a@b.io","firstName":"A","lastName":"B"}"#;
        let parsed: RecipientRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.external_id, None);
        assert!(!parsed.is_verified);
    }
}
