//! Cache root management
//!
//! The cache root holds the fetched artifacts at their local paths, the
//! staging files of unfinished transfers, and the verification record
//! database. This module owns everything that reads or removes files there
//! apart from the transfer itself.
//!
//! # Module Organization
//!
//! - [`config`] - Size budget and eviction thresholds
//! - [`scan`] - Enumerating files under the cache root
//! - [`reservation`] - Paths currently owned by a worker
//! - [`verification`] - Hashing, decompression and record keeping
//! - [`eviction`] - Least-recently-accessed eviction
//! - [`lock`] - Advisory lock shared by fetch and evict
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use depmirror::app::cache::{EvictionManager, InFlightRegistry};
//! use depmirror::app::records::RecordStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let root = std::path::Path::new("./output");
//! let store = Arc::new(RecordStore::open(root)?);
//! let eviction = EvictionManager::new(root, store, InFlightRegistry::new());
//!
//! let report = eviction.enforce_limit(100 * 1024 * 1024 * 1024, 90).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod eviction;
pub mod lock;
pub mod reservation;
pub mod scan;
pub mod verification;

pub use config::CacheConfig;
pub use eviction::{EvictionManager, EvictionReport};
pub use lock::CacheLock;
pub use reservation::{InFlightGuard, InFlightRegistry};
pub use scan::{CacheEntry, DirectoryScanner, FileKind};
pub use verification::{IntegrityVerifier, Verification};
