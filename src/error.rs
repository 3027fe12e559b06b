use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for UI display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "api_key",
    "access_token",
    "client_secret",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for UI display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the caller's UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Crate-wide error type.
///
/// Only stage-level failures travel as `AppError`. Per-row, per-lookup and
/// per-issuance problems are recorded as data on the item they belong to.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Ingestion ─────────────────────────────────────────────────────────────
    #[error("{0}")]
    MalformedInput(String),

    #[error("{0}")]
    MissingColumn(String),

    #[error("File is not valid UTF-8")]
    NotUtf8,

    // ── Pipeline ──────────────────────────────────────────────────────────────
    #[error("Cancelled")]
    Cancelled,

    // ── Backend ───────────────────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Ambient ───────────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a user-friendly presentation suitable for UI display.
    /// Never leaks tokens or other secrets carried in backend messages.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Ingestion ─────────────────────────────────────────────────────
            AppError::MalformedInput(msg) => ErrorPresentation {
                title: "Invalid CSV".into(),
                message: msg.clone(),
                action: Some("Add a header row and at least one recipient".into()),
            },

            AppError::MissingColumn(msg) => ErrorPresentation {
                title: "Missing Column".into(),
                message: msg.clone(),
                action: Some("Download the template and add an email column".into()),
            },

            AppError::NotUtf8 => ErrorPresentation {
                title: "Invalid File Encoding".into(),
                message: "The file must be UTF-8 encoded. Please re-save your file with UTF-8 encoding.".into(),
                action: Some("Convert file to UTF-8".into()),
            },

            // ── Pipeline ──────────────────────────────────────────────────────
            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The operation was cancelled.".into(),
                action: None,
            },

            // ── Backend ───────────────────────────────────────────────────────
            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Authorized".into(),
                message: "The credential backend rejected the request credentials.".into(),
                action: Some("Check the configured API token".into()),
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("The credential backend is limiting requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            AppError::NotFound(msg) => ErrorPresentation {
                title: "Not Found".into(),
                message: sanitize_message(msg, "The requested item was not found."),
                action: None,
            },

            AppError::Backend(msg) => ErrorPresentation {
                title: "Backend Error".into(),
                message: sanitize_message(msg, "The credential backend reported an error."),
                action: None,
            },

            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the credential backend. Please check your network connection.".into(),
                action: Some("Check network and retry".into()),
            },

            // ── Ambient ───────────────────────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Configuration Error".into(),
                message: sanitize_message(msg, "The service configuration is invalid."),
                action: Some("Fix the configuration and restart".into()),
            },

            AppError::Storage(_) => ErrorPresentation {
                title: "Storage Error".into(),
                message: "The batch history could not be read or written.".into(),
                action: Some("Try again".into()),
            },

            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

// Callers receive the presentation, never the raw error text.
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}
