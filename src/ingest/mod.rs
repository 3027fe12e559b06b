//! Recipient file ingestion.
//!
//! Parses uploaded recipient CSVs into candidates and applies per-row
//! structural validation (e-mail presence and shape).

pub mod csv_ingest;

pub use csv_ingest::{
    ingest_csv, ingest_file, template_csv, validate_email, IngestResult, EMAIL_INVALID,
    EMAIL_REQUIRED,
};
