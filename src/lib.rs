pub mod commands;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod services;
pub mod state;
pub mod storage;
pub mod telemetry;

pub use error::AppError;
