//! Durable verification records
//!
//! - [`record`] - The persisted record type
//! - [`store`] - SQLite store keyed by cache-relative path

pub mod record;
pub mod store;

pub use record::VerificationRecord;
pub use store::{RecordStore, StoreStats};
