//! Core application logic for depmirror
//!
//! This module contains the fetch pipeline: data models, entries loading, the
//! HTTP client, the verification record store, cache management and the
//! worker and coordinator layers that drive them.
//!
//! # Examples
//!
//! ```rust,no_run
//! use depmirror::app::{load_entries, Coordinator, CoordinatorConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let entries = load_entries(std::path::Path::new("entries.json")).await?;
//! let coordinator = Coordinator::new(CoordinatorConfig::default())?;
//!
//! let report = coordinator.process(entries, 5).await?;
//! for entry in report.problem_entries() {
//!     eprintln!("{}", entry.describe());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod coordinator;
pub mod hash;
pub mod manifest;
pub mod models;
pub mod queue;
pub mod records;
pub mod worker;

// Re-export main public API
pub use cache::{CacheConfig, EvictionManager, EvictionReport, InFlightRegistry, IntegrityVerifier};
pub use client::{BlobClient, ClientConfig};
pub use coordinator::{Coordinator, CoordinatorConfig, RunReport, ShutdownToken};
pub use hash::Sha1Hash;
pub use manifest::{load_entries, parse_entries, validate_entries};
pub use models::{DependencyEntry, EntryOutcome, LocalFileState, TransferAction, VerificationOutcome};
pub use queue::{QueueStats, WorkQueue};
pub use records::{RecordStore, StoreStats, VerificationRecord};
pub use worker::{EntryReport, WorkerConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_structure() {
        let config = ClientConfig::default();
        assert!(config.tcp_nodelay);
        assert_eq!(WorkerConfig::default().worker_count, 5);
    }
}
