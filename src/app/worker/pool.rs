//! Worker pool management and coordination
//!
//! The pool spawns a fixed number of download workers over one shared queue
//! and joins them. Workers stop on their own when the queue is empty or the
//! shutdown token is cancelled; the pool only collects their results.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::WorkerConfig;
use super::core::{DownloadWorkerBuilder, WorkerResult};
use super::types::EntryReport;
use crate::app::cache::{InFlightRegistry, IntegrityVerifier};
use crate::app::client::BlobClient;
use crate::app::coordinator::signals::ShutdownToken;
use crate::app::queue::WorkQueue;
use crate::errors::{AppError, DownloadError};

/// Pool for managing multiple download workers
#[derive(Debug)]
pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<WorkQueue>,
    client: Arc<BlobClient>,
    verifier: IntegrityVerifier,
    in_flight: InFlightRegistry,
    cache_root: PathBuf,
    shutdown: ShutdownToken,
    worker_handles: Vec<JoinHandle<WorkerResult<usize>>>,
    state: PoolState,
}

/// Current state of the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Pool has been created but not started
    Created,
    /// Pool is running with active workers
    Running,
    /// All workers have been joined
    Finished,
}

/// What the pool's workers did in total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolOutcome {
    /// Entries processed across all workers
    pub processed: usize,
    /// Workers that panicked or were aborted
    pub crashed_workers: usize,
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(
        config: WorkerConfig,
        queue: Arc<WorkQueue>,
        client: Arc<BlobClient>,
        verifier: IntegrityVerifier,
        in_flight: InFlightRegistry,
        shutdown: ShutdownToken,
    ) -> Self {
        let cache_root = verifier.cache_root().to_path_buf();
        Self {
            config,
            queue,
            client,
            verifier,
            in_flight,
            cache_root,
            shutdown,
            worker_handles: Vec::new(),
            state: PoolState::Created,
        }
    }

    /// Spawn all workers, each sending its reports to `report_tx`
    pub fn start(&mut self, report_tx: mpsc::Sender<EntryReport>) -> WorkerResult<()> {
        if self.state != PoolState::Created {
            return Err(DownloadError::ConfigurationError(format!(
                "Cannot start pool in state: {:?}",
                self.state
            ))
            .into());
        }

        for worker_id in 0..self.config.worker_count {
            let worker = DownloadWorkerBuilder::new()
                .id(worker_id as u32)
                .config(self.config.clone())
                .queue(Arc::clone(&self.queue))
                .client(Arc::clone(&self.client))
                .verifier(self.verifier.clone())
                .in_flight(self.in_flight.clone())
                .cache_root(self.cache_root.clone())
                .report_channel(report_tx.clone())
                .shutdown(self.shutdown.clone())
                .build()?;

            self.worker_handles
                .push(tokio::spawn(async move { worker.run().await }));
        }

        self.state = PoolState::Running;
        info!("Worker pool started with {} workers", self.worker_count());
        Ok(())
    }

    /// Wait for every worker to finish
    ///
    /// All workers are joined even when one fails. The first fatal error is
    /// returned after that.
    pub async fn join(mut self) -> WorkerResult<PoolOutcome> {
        let mut outcome = PoolOutcome::default();
        let mut first_error: Option<AppError> = None;

        let results = futures::future::join_all(self.worker_handles.drain(..)).await;
        for result in results {
            match result {
                Ok(Ok(processed)) => outcome.processed += processed,
                Ok(Err(e)) => {
                    debug!("Worker failed: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!("Worker task panicked: {}", e);
                    outcome.crashed_workers += 1;
                }
            }
        }

        self.state = PoolState::Finished;
        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("Worker pool finished: {} entries", outcome.processed);
                Ok(outcome)
            }
        }
    }

    /// Get the current pool state
    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Get number of spawned workers
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::ClientConfig;
    use crate::app::hash::Sha1Hash;
    use crate::app::models::{DependencyEntry, EntryOutcome};
    use crate::app::records::RecordStore;
    use crate::app::worker::config::WorkerConfigBuilder;
    use tempfile::TempDir;
    use url::Url;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_pool_processes_every_entry_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"blob".to_vec()))
            .expect(6)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        let shutdown = ShutdownToken::new();
        let entries: Vec<DependencyEntry> = (0..6)
            .map(|i| {
                DependencyEntry::new(
                    Url::parse(&format!("{}/blob/{}", server.uri(), i)).unwrap(),
                    format!("blobs/{}", i),
                    4,
                    Sha1Hash::digest(b"blob"),
                )
            })
            .collect();
        let queue = Arc::new(WorkQueue::with_entries(entries, shutdown.clone()));

        let config = WorkerConfigBuilder::new().worker_count(3).build().unwrap();
        let mut pool = WorkerPool::new(
            config,
            queue,
            Arc::new(BlobClient::new(&ClientConfig::default()).unwrap()),
            IntegrityVerifier::new(dir.path(), store),
            InFlightRegistry::new(),
            shutdown,
        );

        let (tx, mut rx) = mpsc::channel(16);
        pool.start(tx).unwrap();
        assert_eq!(pool.state(), PoolState::Running);
        assert_eq!(pool.worker_count(), 3);

        let outcome = pool.join().await.unwrap();
        assert_eq!(outcome.processed, 6);

        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        assert_eq!(reports.len(), 6);
        assert!(reports.iter().all(|r| r.outcome == EntryOutcome::Valid));
    }
}
