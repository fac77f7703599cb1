//! Core download worker implementation
//!
//! A worker pulls entries from the shared queue until it is empty or shutdown
//! is requested. For each entry it reserves the final path, decides an action
//! from the on-disk state, transfers with retry, and hands the result to the
//! integrity verifier. Entry-level failures become reports; only record store
//! failures stop the worker, and they cancel the whole run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffCalculator;
use super::config::WorkerConfig;
use super::plan::{plan_transfer, StagingStep};
use super::types::EntryReport;
use crate::app::cache::{InFlightRegistry, IntegrityVerifier, Verification};
use crate::app::client::{BlobClient, TransferRequest};
use crate::app::coordinator::signals::ShutdownToken;
use crate::app::models::{
    partial_path, DependencyEntry, EntryOutcome, LocalFileState, TransferAction,
    VerificationOutcome,
};
use crate::app::queue::WorkQueue;
use crate::errors::{AppError, CacheError, DownloadError, DownloadResult};

/// Result type for worker operations that may stop the run
pub type WorkerResult<T> = std::result::Result<T, AppError>;

/// Individual download worker
#[derive(Debug)]
pub struct DownloadWorker {
    /// Worker identifier, used in logs
    id: u32,
    config: WorkerConfig,
    queue: Arc<WorkQueue>,
    client: Arc<BlobClient>,
    verifier: IntegrityVerifier,
    in_flight: InFlightRegistry,
    cache_root: PathBuf,
    report_tx: Option<mpsc::Sender<EntryReport>>,
    shutdown: ShutdownToken,
}

/// Bytes and attempts of a completed transfer loop
#[derive(Debug, Default, Clone, Copy)]
struct TransferTotals {
    bytes: u64,
    attempts: u32,
    restarted: bool,
}

/// Why a transfer loop ended without a complete staging file
#[derive(Debug)]
struct TransferFailure {
    error: DownloadError,
    totals: TransferTotals,
}

impl DownloadWorker {
    /// Start the worker loop
    ///
    /// Returns the number of entries processed. A fatal error cancels the
    /// shared shutdown token before it is returned.
    pub async fn run(self) -> WorkerResult<usize> {
        debug!("Worker {} starting", self.id);
        let mut processed = 0;

        while let Some(entry) = self.queue.get_next_work().await {
            match self.process_entry(&entry).await {
                Ok(report) => {
                    processed += 1;
                    debug!("Worker {}: {}", self.id, report.describe());
                    if let Some(tx) = &self.report_tx {
                        if tx.send(report).await.is_err() {
                            debug!("Worker {} report receiver dropped", self.id);
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "Worker {} stopping run on {} error: {}",
                        self.id,
                        e.category(),
                        e
                    );
                    self.shutdown.cancel();
                    return Err(e);
                }
            }
        }

        debug!("Worker {} finished after {} entries", self.id, processed);
        Ok(processed)
    }

    /// Bring one entry to a terminal outcome
    ///
    /// # Errors
    ///
    /// Returns `AppError` only for failures that must stop the whole run
    /// (record store errors). Everything else is reported in the
    /// `EntryReport`.
    pub async fn process_entry(&self, entry: &DependencyEntry) -> WorkerResult<EntryReport> {
        let started = Instant::now();
        let final_path = self.cache_root.join(&entry.local_path);
        let partial = partial_path(&final_path);
        let key = entry.record_key();

        let mut report = EntryReport::new(key.as_str(), entry.url.as_str(), TransferAction::New);

        let Some(_reservation) = self.in_flight.reserve(&final_path) else {
            report.error = Some("another worker holds this path".to_string());
            report.elapsed = started.elapsed();
            return Ok(report);
        };

        if let Err(e) = self.prepare(entry, &final_path, &partial, &mut report).await {
            report.outcome = EntryOutcome::DownloadFailed;
            report.error = Some(e.to_string());
            report.elapsed = started.elapsed();
            warn!("{}: {}", key, e);
            return Ok(report);
        }
        debug!("{}: decided {}", key, report.action);

        if report.action == TransferAction::VerifyOnly {
            match self
                .verifier
                .verify(entry, self.config.force_verify)
                .await
            {
                Ok(verification) if verification.is_valid() => {
                    report.outcome = EntryOutcome::Valid;
                    report.fast_path = verification.fast_path;
                    report.elapsed = started.elapsed();
                    return Ok(report);
                }
                Ok(verification) => {
                    info!(
                        "{}: existing file is {}, redownloading",
                        key, verification.outcome
                    );
                }
                Err(e) => self.entry_cache_error(e, &mut report)?,
            }

            if let Err(e) = discard(&[&final_path, &partial]).await {
                report.outcome = EntryOutcome::DownloadFailed;
                report.error = Some(e.to_string());
                report.elapsed = started.elapsed();
                return Ok(report);
            }
            report.restart_as_redownload();
        }

        match self.transfer_with_retry(entry, &partial).await {
            Ok(totals) => {
                report.bytes_transferred = totals.bytes;
                report.attempts = totals.attempts;
                if totals.restarted {
                    report.action = TransferAction::Redownload;
                }
            }
            Err(failure) => {
                report.bytes_transferred = failure.totals.bytes;
                report.attempts = failure.totals.attempts;
                report.outcome = match failure.error {
                    DownloadError::Interrupted => EntryOutcome::Interrupted,
                    _ => EntryOutcome::DownloadFailed,
                };
                match report.outcome {
                    EntryOutcome::Interrupted => {
                        info!("{}: interrupted, partial kept for resume", key)
                    }
                    _ => warn!("{}: download failed: {}", key, failure.error),
                }
                report.error = Some(failure.error.to_string());
                report.elapsed = started.elapsed();
                return Ok(report);
            }
        }

        match self.verifier.finalize(entry).await {
            Ok(verification) => {
                report.outcome = Self::outcome_for(&report.action, &verification);
            }
            Err(e) => self.entry_cache_error(e, &mut report)?,
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Observe the staging state, pick the action and apply its staging step
    async fn prepare(
        &self,
        entry: &DependencyEntry,
        final_path: &Path,
        partial: &Path,
        report: &mut EntryReport,
    ) -> std::io::Result<()> {
        let final_state = LocalFileState::observe(final_path).await?;
        let partial_state = LocalFileState::observe(partial).await?;
        let plan = plan_transfer(entry, &final_state, &partial_state);

        match plan.staging {
            StagingStep::None => {}
            StagingStep::AdoptFinalAsPartial => {
                debug!(
                    "Adopting undersized {} as staging file",
                    final_path.display()
                );
                tokio::fs::rename(final_path, partial).await?;
            }
            StagingStep::DiscardPartial => discard(&[partial]).await?,
            StagingStep::DiscardAll => discard(&[final_path, partial]).await?,
        }

        report.action = plan.action;
        Ok(())
    }

    /// Transfer into the staging file until it holds the whole blob
    ///
    /// Each attempt resumes from the staging file's current length, so
    /// progress made by a failed attempt is kept.
    async fn transfer_with_retry(
        &self,
        entry: &DependencyEntry,
        partial: &Path,
    ) -> Result<TransferTotals, TransferFailure> {
        let expected_len = entry.transfer_size();
        let mut totals = TransferTotals::default();
        let mut retries = 0u32;
        let mut range_restarted = false;

        loop {
            let fail = |error: DownloadError, totals: TransferTotals| TransferFailure { error, totals };

            if self.shutdown.is_cancelled() {
                return Err(fail(DownloadError::Interrupted, totals));
            }

            let mut offset = match LocalFileState::observe(partial).await {
                Ok(state) => state.size,
                Err(e) => return Err(fail(e.into(), totals)),
            };

            if let Some(limit) = expected_len {
                if offset > limit {
                    if let Err(e) = truncate(partial).await {
                        return Err(fail(e.into(), totals));
                    }
                    offset = 0;
                }
                if offset == limit && offset > 0 {
                    debug!("{} already holds all {} bytes", partial.display(), limit);
                    return Ok(totals);
                }
            }

            totals.attempts += 1;
            let request = TransferRequest {
                url: &entry.url,
                partial,
                offset,
                expected_len,
                chunk_size: self.config.chunk_size,
            };

            let error = match self.client.transfer(request, &self.shutdown).await {
                Ok(transfer) => {
                    totals.bytes += transfer.bytes_written;
                    totals.restarted |= transfer.restarted;
                    return Ok(totals);
                }
                Err(DownloadError::RangeNotSatisfiable { .. })
                    if expected_len.is_none() && offset > 0 =>
                {
                    debug!(
                        "Server reports nothing past byte {} for {}, treating as complete",
                        offset, entry.url
                    );
                    return Ok(totals);
                }
                Err(e @ (DownloadError::RangeNotSatisfiable { .. }
                | DownloadError::RangeNotHonored { .. })) => {
                    if let Err(io) = truncate(partial).await {
                        return Err(fail(io.into(), totals));
                    }
                    totals.restarted = true;
                    // The first range failure restarts from byte 0 without spending a retry
                    if !range_restarted {
                        range_restarted = true;
                        info!("{} for {}, restarting from byte 0", e, entry.url);
                        continue;
                    }
                    e
                }
                Err(e) if !e.is_transient() => return Err(fail(e, totals)),
                Err(e) => e,
            };

            if let Ok(state) = LocalFileState::observe(partial).await {
                totals.bytes += state.size.saturating_sub(offset);
            }

            retries += 1;
            if retries > self.config.max_retries {
                return Err(fail(
                    DownloadError::MaxRetriesExceeded {
                        max_retries: self.config.max_retries,
                        last_error: error.to_string(),
                    },
                    totals,
                ));
            }

            let delay = BackoffCalculator::calculate_jittered_delay(
                retries,
                self.config.retry_base_delay,
                self.config.retry_max_delay,
                self.config.retry_backoff_multiplier,
                self.config.backoff_jitter_percentage,
            );
            warn!(
                "Transfer of {} failed (attempt {}/{}): {}. Retrying in {:?}",
                entry.url,
                retries,
                self.config.max_retries,
                error,
                delay
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(fail(DownloadError::Interrupted, totals));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn outcome_for(action: &TransferAction, verification: &Verification) -> EntryOutcome {
        match verification.outcome {
            VerificationOutcome::Valid if *action == TransferAction::Redownload => {
                EntryOutcome::RedownloadedValid
            }
            VerificationOutcome::Valid => EntryOutcome::Valid,
            VerificationOutcome::HashMismatch => EntryOutcome::HashMismatch,
            VerificationOutcome::Corrupt => EntryOutcome::Corrupt,
        }
    }

    /// Record-store failures stop the run; anything else fails the entry
    fn entry_cache_error(&self, e: CacheError, report: &mut EntryReport) -> WorkerResult<()> {
        match e {
            CacheError::Store(store) => Err(AppError::Store(store)),
            other => {
                warn!("{}: {}", report.path, other);
                report.outcome = EntryOutcome::DownloadFailed;
                report.error = Some(other.to_string());
                Ok(())
            }
        }
    }

    /// Get worker ID
    pub fn id(&self) -> u32 {
        self.id
    }
}

async fn discard(paths: &[&Path]) -> std::io::Result<()> {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn truncate(path: &Path) -> std::io::Result<()> {
    match tokio::fs::OpenOptions::new().write(true).open(path).await {
        Ok(file) => file.set_len(0).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Builder for creating download workers
#[derive(Debug, Default)]
pub struct DownloadWorkerBuilder {
    id: Option<u32>,
    config: Option<WorkerConfig>,
    queue: Option<Arc<WorkQueue>>,
    client: Option<Arc<BlobClient>>,
    verifier: Option<IntegrityVerifier>,
    in_flight: Option<InFlightRegistry>,
    cache_root: Option<PathBuf>,
    report_tx: Option<mpsc::Sender<EntryReport>>,
    shutdown: Option<ShutdownToken>,
}

impl DownloadWorkerBuilder {
    /// Create a new worker builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set worker ID
    pub fn id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    /// Set worker configuration
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set work queue
    pub fn queue(mut self, queue: Arc<WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set HTTP client
    pub fn client(mut self, client: Arc<BlobClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set integrity verifier
    pub fn verifier(mut self, verifier: IntegrityVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Set in-flight registry shared with eviction
    pub fn in_flight(mut self, in_flight: InFlightRegistry) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    /// Set cache root
    pub fn cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(cache_root.into());
        self
    }

    /// Set report channel (optional)
    pub fn report_channel(mut self, report_tx: mpsc::Sender<EntryReport>) -> Self {
        self.report_tx = Some(report_tx);
        self
    }

    /// Set shutdown token
    pub fn shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Build the worker (validates all required fields are set)
    pub fn build(self) -> DownloadResult<DownloadWorker> {
        let missing = |what: &str| DownloadError::ConfigurationError(format!("{} is required", what));

        let config = self.config.ok_or_else(|| missing("Worker configuration"))?;
        config.validate()?;

        Ok(DownloadWorker {
            id: self.id.ok_or_else(|| missing("Worker ID"))?,
            config,
            queue: self.queue.ok_or_else(|| missing("Work queue"))?,
            client: self.client.ok_or_else(|| missing("HTTP client"))?,
            verifier: self.verifier.ok_or_else(|| missing("Integrity verifier"))?,
            in_flight: self.in_flight.ok_or_else(|| missing("In-flight registry"))?,
            cache_root: self.cache_root.ok_or_else(|| missing("Cache root"))?,
            report_tx: self.report_tx,
            shutdown: self.shutdown.ok_or_else(|| missing("Shutdown token"))?,
        })
    }
}
