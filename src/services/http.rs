//! Shared HTTP client for the credential backend, with safe logging.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all backend requests.
const CLIENT_USER_AGENT: &str = concat!("bulk-issuance/", env!("CARGO_PKG_VERSION"));

/// Query parameter keys (case-insensitive) whose values are never logged.
const SENSITIVE_QUERY_PARAMS: &[&str] = &["email", "token", "api_key", "access_token"];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component.
    #[default]
    PathOnly,

    /// Log path and query parameters, with sensitive values redacted.
    PathAndQueryRedacted,
}

fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for logging. The result never contains the scheme, host,
/// or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// BackendClient
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client shared by the directory and issuance backends.
///
/// Cloning is cheap; clones share the connection pool and token.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<Arc<SecretString>>,
    logging_mode: LoggingMode,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("logging_mode", &self.logging_mode)
            .finish()
    }
}

impl BackendClient {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` - `base_url` is not a valid URL
    /// - `AppError::Internal` - the HTTP client fails to initialize
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("Invalid backend URL: {}", e)))?;

        Ok(Self {
            http: build_http_client(timeout)?,
            base_url,
            token: token.map(Arc::new),
            logging_mode: LoggingMode::default(),
        })
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    /// Builds a full URL by joining `path` onto the base URL.
    pub fn build_url(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))
    }

    /// Sends a GET with query parameters and decodes the JSON response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let mut url = self.build_url(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let request = self.http.get(url.clone());
        let response = self.execute(request, Method::GET, &url).await?;
        decode_response(response).await
    }

    /// Sends a POST with a JSON body and decodes the JSON response.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AppError> {
        let url = self.build_url(path)?;

        let request = self.http.post(url.clone()).json(body);
        let response = self.execute(request, Method::POST, &url).await?;
        decode_response(response).await
    }

    /// Attaches auth, sends, and logs a request.
    ///
    /// Never logs the Authorization header, request bodies, or raw transport
    /// errors (which may carry the full URL).
    async fn execute(
        &self,
        mut request: reqwest::RequestBuilder,
        method: Method,
        url: &Url,
    ) -> Result<reqwest::Response, AppError> {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(url, self.logging_mode);
        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                info!(
                    "[BACKEND] {} {} {} {}ms",
                    method,
                    sanitized_url,
                    response.status().as_u16(),
                    duration_ms
                );
                Ok(response)
            }
            Err(e) => {
                info!("[BACKEND] {} {} FAILED {}ms", method, sanitized_url, duration_ms);
                let reason = if e.is_timeout() {
                    "request timed out"
                } else {
                    "connection to credential backend failed"
                };
                Err(AppError::ConnectionFailed(reason.to_string()))
            }
        }
    }
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Checks the status and parses a JSON body.
async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AppError> {
    let status = response.status();
    if !status.is_success() {
        return Err(parse_error_response(response, status).await);
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AppError::Backend(format!("Failed to parse response: {}", e)))
}

/// Maps a non-2xx response to an `AppError`.
async fn parse_error_response(response: reqwest::Response, status: StatusCode) -> AppError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return AppError::NotAuthenticated;
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    if let Ok(error) = serde_json::from_str::<BackendErrorBody>(&body) {
        if status == StatusCode::NOT_FOUND {
            return AppError::NotFound(error.message);
        }
        return match error.code {
            Some(code) => AppError::Backend(format!("[{}] {}", code, error.message)),
            None => AppError::Backend(error.message),
        };
    }

    if status == StatusCode::NOT_FOUND {
        return AppError::NotFound("Resource not found".to_string());
    }

    AppError::Backend(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
