//! The resolution and issuance stages of a bulk issuance batch.

pub mod executor;
pub mod progress;
pub mod resolution;

pub use executor::{generate_batch_id, BatchExecutor, PipelineConfig, DEFAULT_CHUNK_SIZE};
pub use progress::{ProgressEmitter, ProgressEvent};
pub use resolution::{resolve_candidates, CANCELLED_MESSAGE};
