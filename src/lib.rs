//! depmirror library
//!
//! Fetches content-addressed dependency blobs into a local directory that
//! doubles as a size-bounded cache. Every stored blob is checked against its
//! expected size and SHA-1; verification results are persisted so unchanged
//! files are not re-hashed on later runs.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
