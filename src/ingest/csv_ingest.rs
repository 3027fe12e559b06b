//! Recipient CSV ingestion.
//!
//! Turns the text of an uploaded recipient file into an ordered list of
//! `CandidateRow`s. Structural problems with the file as a whole (no data
//! rows, no email column) reject the import; problems with a single row only
//! mark that row invalid.

use std::path::Path;
use std::sync::LazyLock;

use csv::{ReaderBuilder, Trim};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::model::CandidateRow;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// UTF-8 BOM as it appears in decoded text.
const BOM_CHAR: char = '\u{feff}';

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Header column holding the recipient e-mail (required).
const EMAIL_COLUMN: &str = "email";

/// Header column holding the recipient display name (optional).
const NAME_COLUMN: &str = "name";

pub const EMAIL_REQUIRED: &str = "Email is required";
pub const EMAIL_INVALID: &str = "Invalid email format";

/// Downloadable example file; re-ingesting it yields two valid rows.
const TEMPLATE_CSV: &str = "email,name\njohn@university.edu,John Doe\njane@tech.io,Jane Smith";

/// `local@domain.tld` with no whitespace and exactly one `@` per side.
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("invalid email pattern"));

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Result of ingesting one recipient file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResult {
    /// Number of non-blank data rows.
    pub total_rows: usize,
    /// Rows with no structural errors.
    pub valid_rows: usize,
    /// Rows with at least one structural error.
    pub invalid_rows: usize,
    /// One candidate per data row, in file order.
    pub candidates: Vec<CandidateRow>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the example recipient file offered for download.
pub fn template_csv() -> &'static str {
    TEMPLATE_CSV
}

/// Parses recipient CSV text into candidates.
///
/// # Errors
///
/// - `AppError::MalformedInput` - fewer than two non-blank lines
/// - `AppError::MissingColumn` - the header has no `email` column
pub fn ingest_csv(content: &str) -> Result<IngestResult, AppError> {
    let content = content.strip_prefix(BOM_CHAR).unwrap_or(content);

    let lines: Vec<&str> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();

    if lines.len() < 2 {
        return Err(AppError::MalformedInput(
            "CSV file must have a header row and at least one data row".to_string(),
        ));
    }

    let headers = split_fields(&lines[0].to_lowercase());
    let email_index = headers
        .iter()
        .position(|h| h == EMAIL_COLUMN)
        .ok_or_else(|| AppError::MissingColumn("CSV must have an email column".to_string()))?;
    let name_index = headers.iter().position(|h| h == NAME_COLUMN);

    let candidates: Vec<CandidateRow> = lines[1..]
        .iter()
        .map(|line| {
            let fields = split_fields(line);
            let email = field_at(&fields, Some(email_index));
            let name = field_at(&fields, name_index);
            build_candidate(&email, name)
        })
        .collect();

    let valid_rows = candidates.iter().filter(|c| c.is_structurally_valid).count();
    let result = IngestResult {
        total_rows: candidates.len(),
        valid_rows,
        invalid_rows: candidates.len() - valid_rows,
        candidates,
    };

    info!(
        "[INGEST] Parsed {} rows ({} valid, {} invalid)",
        result.total_rows, result.valid_rows, result.invalid_rows
    );

    Ok(result)
}

/// Reads a recipient file from disk and ingests it.
///
/// # Errors
///
/// - `AppError::NotUtf8` - the file is not UTF-8 text
/// - `AppError::Internal` - the file cannot be read
/// - any error from [`ingest_csv`]
pub async fn ingest_file(path: &Path) -> Result<IngestResult, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read file: {}", e)))?;

    let data = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);
    let content = std::str::from_utf8(data).map_err(|_| AppError::NotUtf8)?;

    info!("[INGEST] Read {} bytes from recipient file", data.len());

    ingest_csv(content)
}

/// Validates a raw e-mail field, returning the row errors in order.
pub fn validate_email(email: &str) -> Vec<String> {
    if email.is_empty() {
        vec![EMAIL_REQUIRED.to_string()]
    } else if !EMAIL_PATTERN.is_match(email) {
        vec![EMAIL_INVALID.to_string()]
    } else {
        Vec::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_candidate(email: &str, name: String) -> CandidateRow {
    let structural_errors = validate_email(email);
    CandidateRow {
        email: email.to_lowercase(),
        name,
        is_structurally_valid: structural_errors.is_empty(),
        structural_errors,
    }
}

/// Splits one line on every comma into trimmed fields.
///
/// Quote characters are ordinary data, so no field ever contains a comma and
/// the three-column report rows stay aligned.
fn split_fields(line: &str) -> Vec<String> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(String::from).collect(),
        Some(Err(_)) => line.split(',').map(|f| f.trim().to_string()).collect(),
        None => Vec::new(),
    }
}

fn field_at(fields: &[String], index: Option<usize>) -> String {
    index
        .and_then(|i| fields.get(i))
        .cloned()
        .unwrap_or_default()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_csv(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content).expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    fn assert_counts_consistent(result: &IngestResult) {
        assert_eq!(result.candidates.len(), result.total_rows);
        assert_eq!(result.total_rows, result.valid_rows + result.invalid_rows);
        for c in &result.candidates {
            assert_eq!(c.is_structurally_valid, c.structural_errors.is_empty());
        }
    }

    #[test]
    fn test_template_round_trip() {
        let result = ingest_csv(template_csv()).expect("template should ingest");

        assert_eq!(result.total_rows, 2);
        assert_eq!(result.valid_rows, 2);
        assert_eq!(result.invalid_rows, 0);
        assert_eq!(result.candidates[0].email, "john@university.edu");
        assert_eq!(result.candidates[1].name, "Jane Smith");
        assert_counts_consistent(&result);
    }

    #[test]
    fn test_blank_line_dropped_and_invalid_row_marked() {
        let result = ingest_csv("email,name\nfoo@bar.com,Foo\nnot-an-email,Bar\n\n")
            .expect("should ingest");

        assert_eq!(result.total_rows, 2);
        assert!(result.candidates[0].is_structurally_valid);
        assert!(!result.candidates[1].is_structurally_valid);
        assert_eq!(result.candidates[1].structural_errors, vec![EMAIL_INVALID]);
        assert_counts_consistent(&result);
    }

    #[test]
    fn test_missing_email_column_rejected() {
        let err = ingest_csv("name,id\nJohn,1").expect_err("should reject");

        assert!(matches!(err, AppError::MissingColumn(_)));
        assert!(err.to_string().contains("must have an email column"));
    }

    #[test]
    fn test_header_only_is_malformed() {
        let err = ingest_csv("email,name\n\n   \n").expect_err("should reject");
        assert!(matches!(err, AppError::MalformedInput(_)));

        let err = ingest_csv("").expect_err("should reject");
        assert!(matches!(err, AppError::MalformedInput(_)));
    }

    #[test]
    fn test_empty_email_is_required_error() {
        let result = ingest_csv("name,email\nNo Mail,\nShort").expect("should ingest");

        assert_eq!(result.total_rows, 2);
        for c in &result.candidates {
            assert_eq!(c.structural_errors, vec![EMAIL_REQUIRED]);
        }
        assert_eq!(result.candidates[0].name, "No Mail");
        assert_counts_consistent(&result);
    }

    #[test]
    fn test_header_is_case_insensitive_and_trimmed() {
        let result = ingest_csv(" Name , EMAIL \nAda Lovelace , Ada@Example.COM ")
            .expect("should ingest");

        let c = &result.candidates[0];
        assert_eq!(c.email, "ada@example.com");
        assert_eq!(c.name, "Ada Lovelace");
        assert!(c.is_structurally_valid);
    }

    #[test]
    fn test_name_column_optional() {
        let result = ingest_csv("email\na@b.io\nc@d.io").expect("should ingest");

        assert_eq!(result.valid_rows, 2);
        assert!(result.candidates.iter().all(|c| c.name.is_empty()));
    }

    #[test]
    fn test_crlf_and_bom_are_tolerated() {
        let result = ingest_csv("\u{feff}email,name\r\na@b.io,A\r\n\r\nc@d.io,C\r\n")
            .expect("should ingest");

        assert_eq!(result.total_rows, 2);
        assert_eq!(result.valid_rows, 2);
    }

    #[test]
    fn test_fields_split_on_every_comma() {
        let result = ingest_csv("email,name\nada@uni.edu,\"Lovelace, Ada\"\nbob@uni.edu,Bob,extra")
            .expect("should ingest");

        assert_eq!(result.candidates[0].name, "\"Lovelace");
        assert_eq!(result.candidates[1].name, "Bob");
        assert!(result.candidates.iter().all(|c| !c.name.contains(',')));
        assert_counts_consistent(&result);
    }

    #[test]
    fn test_ingestion_is_deterministic() {
        let input = "email,name\nx@y.z,X\nbad,B\n,Empty\n";
        let first = ingest_csv(input).unwrap();
        let second = ingest_csv(input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_email_shapes() {
        assert!(validate_email("a@b.co").is_empty());
        assert_eq!(validate_email("a@b"), vec![EMAIL_INVALID]);
        assert_eq!(validate_email("a b@c.de"), vec![EMAIL_INVALID]);
        assert_eq!(validate_email("a@@c.de"), vec![EMAIL_INVALID]);
        assert_eq!(validate_email(""), vec![EMAIL_REQUIRED]);
    }

    #[tokio::test]
    async fn test_ingest_file_with_bom() {
        let mut content = Vec::new();
        content.extend_from_slice(UTF8_BOM);
        content.extend_from_slice(b"email,name\nalice@example.com,Alice\n");
        let file = create_temp_csv(&content);

        let result = ingest_file(file.path()).await.expect("should ingest");
        assert_eq!(result.total_rows, 1);
        assert_eq!(result.valid_rows, 1);
    }

    #[tokio::test]
    async fn test_ingest_file_non_utf8() {
        let file = create_temp_csv(b"email,name\n\xff\xfe@x.io,Bad\n");

        let err = ingest_file(file.path()).await.expect_err("should reject");
        assert!(matches!(err, AppError::NotUtf8));
    }

    #[tokio::test]
    async fn test_ingest_file_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = ingest_file(&dir.path().join("absent.csv"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, AppError::Internal(_)));
    }
}
