//! External collaborators of the pipeline: the Recipient Directory and the
//! Issuance Service, each with an in-memory and an HTTP implementation.

pub mod directory;
pub mod http;
pub mod issuance;

pub use directory::{HttpRecipientDirectory, InMemoryDirectory, LookupOutcome, RecipientDirectory};
pub use http::{BackendClient, LoggingMode};
pub use issuance::{
    placeholder_proof, HttpIssuanceService, InMemoryIssuanceService, IssuanceService, IssueOutcome,
};
