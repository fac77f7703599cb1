//! Background task management for the coordinator
//!
//! Periodic work that runs alongside the worker pool: eviction passes while
//! a fetch is in progress, and queue progress logging. Every task exits when
//! the stop token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::signals::ShutdownToken;
use crate::app::cache::{EvictionManager, EvictionReport};
use crate::app::queue::WorkQueue;
use crate::constants::coordinator;
use crate::errors::CacheError;

/// What the background eviction task did during a run
#[derive(Debug, Default)]
pub struct EvictionLog {
    /// Passes that removed files
    pub reports: Vec<EvictionReport>,
    /// The error that stopped the task, if any
    pub failure: Option<CacheError>,
}

/// Eviction log shared between the task and the coordinator
pub type SharedEvictionLog = Arc<Mutex<EvictionLog>>;

/// Settings for the periodic eviction task
#[derive(Debug, Clone, Copy)]
pub struct EvictionSchedule {
    pub interval: Duration,
    pub max_bytes: u64,
    pub threshold_pct: u8,
}

/// Background task manager for eviction and monitoring tasks
pub struct BackgroundTaskManager {
    tasks: Vec<JoinHandle<()>>,
}

impl BackgroundTaskManager {
    /// Create a new background task manager
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Start periodic eviction
    ///
    /// Reports from passes that removed files are appended to `log`. A failed
    /// pass is fatal: the error is stored in `log` and `run_shutdown` is
    /// cancelled so workers stop taking work.
    pub fn start_eviction_task(
        &mut self,
        eviction: Arc<EvictionManager>,
        schedule: EvictionSchedule,
        log: SharedEvictionLog,
        run_shutdown: ShutdownToken,
        stop: ShutdownToken,
    ) {
        if schedule.max_bytes == 0 {
            debug!("Cache size unlimited, no background eviction");
            return;
        }

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(schedule.interval);
            // The first tick completes immediately; the coordinator already ran a pass
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match eviction.enforce_limit(schedule.max_bytes, schedule.threshold_pct).await {
                            Ok(report) => {
                                if report.files_removed > 0 {
                                    info!("{}", report.summary());
                                    log.lock().await.reports.push(report);
                                } else {
                                    debug!("{}", report.summary());
                                }
                            }
                            Err(e) => {
                                error!("Background eviction failed: {}", e);
                                log.lock().await.failure = Some(e);
                                run_shutdown.cancel();
                                break;
                            }
                        }
                    }
                    _ = stop.cancelled() => {
                        debug!("Eviction task received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.tasks.push(task);
    }

    /// Start periodic progress logging
    pub fn start_periodic_logging_task(
        &mut self,
        queue: Arc<WorkQueue>,
        interval: Duration,
        stop: ShutdownToken,
    ) {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut last_dispatched = 0;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = queue.stats().await;
                        if stats.pending == 0 {
                            debug!("All entries dispatched, progress logging done");
                            break;
                        }
                        info!(
                            "Fetch progress: {} of {} dispatched (+{}), {} pending",
                            stats.dispatched,
                            stats.total,
                            stats.dispatched.saturating_sub(last_dispatched),
                            stats.pending
                        );
                        last_dispatched = stats.dispatched;
                    }
                    _ = stop.cancelled() => {
                        debug!("Periodic logging task received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.tasks.push(task);
    }

    /// Wait for every task, giving each a bounded time to exit
    pub async fn shutdown_all(self) {
        debug!("Initiating background task shutdown");

        for task in self.tasks {
            if tokio::time::timeout(coordinator::TASK_SHUTDOWN_TIMEOUT, task)
                .await
                .is_err()
            {
                warn!(
                    "Background task shutdown timed out after {:?}",
                    coordinator::TASK_SHUTDOWN_TIMEOUT
                );
            }
        }

        debug!("All background tasks shutdown complete");
    }

    /// Get the number of active background tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}
