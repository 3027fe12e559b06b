//! Storage module for the local SQLite batch history.

pub mod batches;
mod database;

pub use batches::{get_batch, list_batches, save_batch_report, BatchOutcomeRow, BatchRunRow, BatchRunWithOutcomes};
pub use database::Database;
