//! Download worker system for concurrent entry processing
//!
//! Workers pull entries from the shared queue and never wait on a specific
//! entry. Each one brings its entry to a terminal outcome: it reserves the
//! final path, decides an action from what is on disk, transfers with retry
//! and backoff, then verifies and records the result.
//!
//! # Module Organization
//!
//! - [`config`] - Worker configuration with validation
//! - [`plan`] - Transfer action decision from local file state
//! - [`backoff`] - Retry delay calculation
//! - [`types`] - Per-entry reports
//! - [`core`] - Individual worker implementation
//! - [`pool`] - Worker pool management
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use depmirror::app::worker::{WorkerConfig, WorkerPool};
//! use depmirror::app::cache::{InFlightRegistry, IntegrityVerifier};
//! use depmirror::app::client::{BlobClient, ClientConfig};
//! use depmirror::app::coordinator::signals::ShutdownToken;
//! use depmirror::app::queue::WorkQueue;
//! use depmirror::app::records::RecordStore;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let root = Path::new("./output");
//! let store = Arc::new(RecordStore::open(root)?);
//! let shutdown = ShutdownToken::new();
//! let queue = Arc::new(WorkQueue::with_entries(Vec::new(), shutdown.clone()));
//!
//! let mut pool = WorkerPool::new(
//!     WorkerConfig::default(),
//!     queue,
//!     Arc::new(BlobClient::new(&ClientConfig::default())?),
//!     IntegrityVerifier::new(root, store),
//!     InFlightRegistry::new(),
//!     shutdown,
//! );
//!
//! let (report_tx, mut report_rx) = tokio::sync::mpsc::channel(100);
//! pool.start(report_tx)?;
//! while let Some(report) = report_rx.recv().await {
//!     println!("{}", report.describe());
//! }
//! pool.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod core;
pub mod plan;
pub mod pool;
pub mod types;

// Re-export main public API
pub use backoff::BackoffCalculator;
pub use config::{WorkerConfig, WorkerConfigBuilder};
pub use core::{DownloadWorker, DownloadWorkerBuilder, WorkerResult};
pub use plan::{plan_transfer, StagingStep, TransferPlan};
pub use pool::{PoolOutcome, PoolState, WorkerPool};
pub use types::EntryReport;
