//! Fetch orchestration
//!
//! The coordinator is the control plane of a fetch run. It prepares the cache
//! root, runs the worker pool over the entries, keeps the cache under budget
//! while the pool runs, and collects one report per entry.
//!
//! # Architecture
//!
//! - [`config`] - Configuration bundle for a run
//! - [`stats`] - Run report and summary counts
//! - [`signals`] - Shutdown token and OS signal handling
//! - [`background_tasks`] - Periodic eviction and progress logging
//!
//! # Examples
//!
//! ```rust,no_run
//! use depmirror::app::coordinator::{Coordinator, CoordinatorConfig};
//! use depmirror::app::manifest::load_entries;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let entries = load_entries(std::path::Path::new("entries.json")).await?;
//! let coordinator = Coordinator::new(CoordinatorConfig::default().with_signal_handling(true))?;
//!
//! let report = coordinator.process(entries, 8).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod background_tasks;
pub mod config;
pub mod signals;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::cache::{
    CacheLock, EvictionManager, EvictionReport, InFlightRegistry, IntegrityVerifier,
};
use crate::app::client::BlobClient;
use crate::app::manifest::validate_entries;
use crate::app::models::DependencyEntry;
use crate::app::queue::WorkQueue;
use crate::app::records::RecordStore;
use crate::app::worker::{EntryReport, WorkerPool};
use crate::errors::{AppError, Result};

pub use background_tasks::{BackgroundTaskManager, EvictionLog, EvictionSchedule};
pub use config::CoordinatorConfig;
pub use signals::{ShutdownToken, SignalHandler};
pub use stats::{RunCounts, RunReport};

/// Main coordinator for fetch runs
///
/// Owns the components shared by every worker: the record store, the HTTP
/// client, the in-flight registry and the eviction manager.
pub struct Coordinator {
    config: CoordinatorConfig,
    store: Arc<RecordStore>,
    client: Arc<BlobClient>,
    in_flight: InFlightRegistry,
    eviction: Arc<EvictionManager>,
    shutdown: ShutdownToken,
}

impl Coordinator {
    /// Create a coordinator, opening the record store under the cache root
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the configuration is invalid, the cache root or
    /// the record store cannot be created, or the HTTP client cannot be built.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(RecordStore::open(&config.cache.cache_root)?);
        Self::with_store(config, store)
    }

    /// Create a coordinator around an already open record store
    pub fn with_store(config: CoordinatorConfig, store: Arc<RecordStore>) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(BlobClient::new(&config.client)?);
        let in_flight = InFlightRegistry::new();
        let eviction = Arc::new(
            EvictionManager::new(
                &config.cache.cache_root,
                Arc::clone(&store),
                in_flight.clone(),
            )
            .with_target_pct(config.cache.eviction_target_pct),
        );

        Ok(Self {
            config,
            store,
            client,
            in_flight,
            eviction,
            shutdown: ShutdownToken::new(),
        })
    }

    /// Token that cancels the current and any later run when fired
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Shared record store
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Run one eviction pass against the configured budget
    pub async fn enforce_limit(&self) -> Result<EvictionReport> {
        let report = self
            .eviction
            .enforce_limit(
                self.config.cache.max_cache_size,
                self.config.cache.cleanup_threshold_pct,
            )
            .await?;
        Ok(report)
    }

    /// Bring every entry to a terminal outcome with `concurrency` workers
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the entries are invalid or a record store or
    /// eviction failure stopped the run. The store is flushed first in
    /// every case.
    pub async fn process(
        &self,
        entries: Vec<DependencyEntry>,
        concurrency: usize,
    ) -> Result<RunReport> {
        self.process_with(entries, concurrency, |_| {}).await
    }

    /// Like [`process`](Self::process), calling `on_report` as each entry
    /// finishes
    pub async fn process_with<F>(
        &self,
        entries: Vec<DependencyEntry>,
        concurrency: usize,
        on_report: F,
    ) -> Result<RunReport>
    where
        F: FnMut(&EntryReport),
    {
        validate_entries(&entries)?;

        let mut worker_config = self.config.worker.clone();
        worker_config.worker_count = concurrency;
        worker_config.validate()?;

        let started = Instant::now();
        let mut report = RunReport::new(entries.len());

        info!(
            "Fetching {} entries into {} with {} workers",
            entries.len(),
            self.config.cache.cache_root.display(),
            concurrency
        );

        let outcome = self
            .run(entries, worker_config, &mut report, on_report)
            .await;

        // Flush even when the run failed or was cancelled
        let flushed = RecordStore::blocking(&self.store, |store| store.flush()).await;

        report.elapsed = started.elapsed();
        report.cancelled = self.shutdown.is_cancelled();

        outcome?;
        flushed?;

        info!(
            "Fetch finished in {:?}: {} valid, {} failed",
            report.elapsed,
            report.counts.valid,
            report.counts.failed()
        );
        Ok(report)
    }

    async fn run<F>(
        &self,
        entries: Vec<DependencyEntry>,
        worker_config: crate::app::worker::WorkerConfig,
        report: &mut RunReport,
        mut on_report: F,
    ) -> Result<()>
    where
        F: FnMut(&EntryReport),
    {
        let cache_root = &self.config.cache.cache_root;
        tokio::fs::create_dir_all(cache_root).await?;
        let _lock = CacheLock::acquire(cache_root)?;

        report.stale_records_purged =
            RecordStore::blocking(&self.store, |store| store.purge_stale()).await?;

        report.push_eviction(self.enforce_limit().await?);

        let queue = Arc::new(WorkQueue::with_entries(entries, self.shutdown.clone()));
        let signal_task = self
            .config
            .handle_signals
            .then(|| SignalHandler::new(self.shutdown.clone()).setup());

        let (report_tx, mut report_rx) = mpsc::channel(worker_config.report_buffer_size);
        let mut pool = WorkerPool::new(
            worker_config,
            Arc::clone(&queue),
            Arc::clone(&self.client),
            IntegrityVerifier::new(cache_root, Arc::clone(&self.store)),
            self.in_flight.clone(),
            self.shutdown.clone(),
        );
        pool.start(report_tx)?;

        let stop = ShutdownToken::new();
        let eviction_log = background_tasks::SharedEvictionLog::default();
        let mut background = BackgroundTaskManager::new();
        background.start_eviction_task(
            Arc::clone(&self.eviction),
            EvictionSchedule {
                interval: self.config.cache.eviction_interval,
                max_bytes: self.config.cache.max_cache_size,
                threshold_pct: self.config.cache.cleanup_threshold_pct,
            },
            Arc::clone(&eviction_log),
            self.shutdown.clone(),
            stop.clone(),
        );
        background.start_periodic_logging_task(
            Arc::clone(&queue),
            self.config.progress_interval(),
            stop.clone(),
        );

        while let Some(entry_report) = report_rx.recv().await {
            on_report(&entry_report);
            report.push(entry_report);
        }

        let pool_result = pool.join().await;
        stop.cancel();
        background.shutdown_all().await;
        if let Some(handle) = signal_task {
            handle.abort();
        }

        let not_started = queue.drain_pending().await;
        if !not_started.is_empty() {
            warn!(
                "Shutdown left {} entries unstarted",
                not_started.len()
            );
        }
        report.counts.not_started = not_started.len();

        let log = std::mem::take(&mut *eviction_log.lock().await);
        report.evictions.extend(log.reports);

        match pool_result {
            Ok(outcome) => {
                debug!("Pool processed {} entries", outcome.processed);
                if outcome.crashed_workers > 0 {
                    error!("{} workers crashed", outcome.crashed_workers);
                }
            }
            Err(e) => return Err(e),
        }
        if let Some(e) = log.failure {
            return Err(AppError::Cache(e));
        }

        if !self.shutdown.is_cancelled() {
            report.push_eviction(self.enforce_limit().await?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::cache::CacheConfig;
    use crate::app::hash::Sha1Hash;
    use crate::app::models::EntryOutcome;
    use tempfile::TempDir;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn coordinator(dir: &TempDir) -> Coordinator {
        let mut config = CoordinatorConfig::default();
        config.cache = CacheConfig::with_cache_root(dir.path());
        Coordinator::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_empty_run() {
        let dir = TempDir::new().unwrap();
        let report = coordinator(&dir).process(Vec::new(), 2).await.unwrap();
        assert_eq!(report.total_entries, 0);
        assert!(report.entries.is_empty());
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_run_refused_while_cache_locked() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        let held = CacheLock::acquire(dir.path()).unwrap();

        let result = coordinator.process(Vec::new(), 1).await;
        assert!(matches!(
            result,
            Err(AppError::Cache(crate::errors::CacheError::Locked { .. }))
        ));

        drop(held);
        assert!(coordinator.process(Vec::new(), 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_paths_rejected() {
        let dir = TempDir::new().unwrap();
        let entry = DependencyEntry::new(
            Url::parse("https://mirror.example.com/a").unwrap(),
            "a",
            1,
            Sha1Hash::digest(b"a"),
        );
        let result = coordinator(&dir)
            .process(vec![entry.clone(), entry], 1)
            .await;
        assert!(matches!(result, Err(AppError::Manifest(_))));
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(coordinator(&dir).process(Vec::new(), 0).await.is_err());
    }

    #[tokio::test]
    async fn test_reports_are_observed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"alpha".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let entry = DependencyEntry::new(
            Url::parse(&format!("{}/a", server.uri())).unwrap(),
            "a",
            5,
            Sha1Hash::digest(b"alpha"),
        );

        let mut seen = Vec::new();
        let report = coordinator(&dir)
            .process_with(vec![entry], 1, |r| seen.push(r.outcome))
            .await
            .unwrap();

        assert_eq!(seen, vec![EntryOutcome::Valid]);
        assert_eq!(report.counts.valid, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.shutdown_token().cancel();

        let entries = (0..3)
            .map(|i| {
                DependencyEntry::new(
                    Url::parse(&format!("{}/{}", server.uri(), i)).unwrap(),
                    format!("e{}", i),
                    1,
                    Sha1Hash::digest(b"x"),
                )
            })
            .collect();

        let report = coordinator.process(entries, 2).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.counts.not_started, 3);
        assert!(!report.has_failures());
    }
}
