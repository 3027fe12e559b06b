//! Batch reports and their CSV artifacts.

pub mod atomic_writer;
pub mod batch_report;
pub mod sink;

pub use batch_report::{BatchReport, BatchSummary, ReportArtifact, CSV_MIME_TYPE};
pub use sink::{export_report, ArtifactSink, DirectorySink};
