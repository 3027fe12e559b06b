//! Command handlers: the operations a front end invokes.

pub mod bulk;
pub mod history;

pub use bulk::*;
pub use history::*;
