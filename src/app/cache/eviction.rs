//! Access-time based cache eviction
//!
//! Keeps the bytes under the cache root below a budget. Once usage reaches the
//! cleanup threshold, files are deleted least-recently-accessed first until
//! usage is back at the target watermark. Files with a transfer in flight are
//! never touched, and each deleted artifact takes its verification record
//! with it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::reservation::InFlightRegistry;
use super::scan::{CacheEntry, DirectoryScanner, FileKind};
use crate::app::records::RecordStore;
use crate::constants::cache;
use crate::errors::{CacheError, CacheResult};

/// What one eviction pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Usage reached the threshold and deletion ran
    pub triggered: bool,
    /// Another pass was already running, nothing was done
    pub skipped: bool,
    /// Files deleted
    pub files_removed: usize,
    /// Bytes released
    pub bytes_freed: u64,
    /// Candidates left alone because a worker held them
    pub in_flight_skipped: usize,
    /// Usage before the pass
    pub total_before: u64,
    /// Usage after the pass
    pub total_after: u64,
    /// Budget the pass enforced (0 = unlimited)
    pub max_bytes: u64,
}

impl EvictionReport {
    fn skipped(max_bytes: u64) -> Self {
        Self {
            skipped: true,
            max_bytes,
            ..Default::default()
        }
    }

    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        if self.skipped {
            "Eviction skipped: another pass is running".to_string()
        } else if self.max_bytes == 0 {
            "Cache size unlimited, nothing to evict".to_string()
        } else if !self.triggered {
            format!(
                "Cache usage {} of {} bytes is below the cleanup threshold",
                self.total_before, self.max_bytes
            )
        } else {
            format!(
                "Evicted {} files ({} bytes): {} -> {} of {} bytes",
                self.files_removed,
                self.bytes_freed,
                self.total_before,
                self.total_after,
                self.max_bytes
            )
        }
    }
}

/// Enforces the cache size budget
#[derive(Debug)]
pub struct EvictionManager {
    cache_root: PathBuf,
    store: Arc<RecordStore>,
    in_flight: InFlightRegistry,
    target_pct: Option<u8>,
    running: Mutex<()>,
}

impl EvictionManager {
    /// Create a manager for `cache_root`
    ///
    /// # Arguments
    ///
    /// * `cache_root` - Directory whose usage is bounded
    /// * `store` - Record store whose entries are removed with their files
    /// * `in_flight` - Registry of paths workers are currently writing
    pub fn new(
        cache_root: impl Into<PathBuf>,
        store: Arc<RecordStore>,
        in_flight: InFlightRegistry,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            store,
            in_flight,
            target_pct: None,
            running: Mutex::new(()),
        }
    }

    /// Override the watermark eviction drives usage down to
    pub fn with_target_pct(mut self, target_pct: Option<u8>) -> Self {
        self.target_pct = target_pct;
        self
    }

    fn watermark_pct(&self, threshold_pct: u8) -> u8 {
        self.target_pct
            .unwrap_or_else(|| threshold_pct.saturating_sub(cache::DEFAULT_EVICTION_GAP_PCT))
            .min(threshold_pct)
    }

    /// Bring cache usage under the budget if it has reached the threshold
    ///
    /// A pass already in progress makes this call return a skipped report
    /// immediately. `max_bytes == 0` means the cache is unlimited.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the cache root cannot be scanned, a file cannot
    /// be deleted, or its record cannot be removed.
    pub async fn enforce_limit(
        &self,
        max_bytes: u64,
        threshold_pct: u8,
    ) -> CacheResult<EvictionReport> {
        if max_bytes == 0 {
            debug!("Cache size unlimited, skipping eviction");
            return Ok(EvictionReport::default());
        }

        let Ok(_running) = self.running.try_lock() else {
            warn!("Eviction already in progress, skipping this pass");
            return Ok(EvictionReport::skipped(max_bytes));
        };

        let pass = EvictionPass {
            cache_root: self.cache_root.clone(),
            store: Arc::clone(&self.store),
            in_flight: self.in_flight.clone(),
            max_bytes,
            trigger_bytes: percent_of(max_bytes, threshold_pct),
            target_bytes: percent_of(max_bytes, self.watermark_pct(threshold_pct)),
        };

        tokio::task::spawn_blocking(move || pass.run())
            .await
            .map_err(|e| CacheError::TaskFailed(e.to_string()))?
    }
}

fn percent_of(bytes: u64, pct: u8) -> u64 {
    let scaled = u128::from(bytes) * u128::from(pct) / 100;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

struct EvictionPass {
    cache_root: PathBuf,
    store: Arc<RecordStore>,
    in_flight: InFlightRegistry,
    max_bytes: u64,
    trigger_bytes: u64,
    target_bytes: u64,
}

impl EvictionPass {
    fn run(self) -> CacheResult<EvictionReport> {
        let mut entries = DirectoryScanner::scan_blocking(&self.cache_root)?;
        let mut total = DirectoryScanner::total_size(&entries);

        let mut report = EvictionReport {
            total_before: total,
            max_bytes: self.max_bytes,
            ..Default::default()
        };

        if total < self.trigger_bytes {
            debug!(
                "Cache usage {} below threshold {} bytes",
                total, self.trigger_bytes
            );
            report.total_after = total;
            return Ok(report);
        }

        report.triggered = true;
        info!(
            "Cache usage {} bytes reached threshold {} bytes, evicting down to {} bytes",
            total, self.trigger_bytes, self.target_bytes
        );

        entries.sort_by_key(|entry| entry.last_access);

        for entry in entries {
            if total <= self.target_bytes {
                break;
            }

            let owner = entry.owner_path();
            let Some(deleted) = self
                .in_flight
                .with_idle(&owner, || self.delete_entry(&entry))
            else {
                debug!("Skipping in-flight file {}", entry.path.display());
                report.in_flight_skipped += 1;
                continue;
            };

            if deleted? {
                report.files_removed += 1;
                report.bytes_freed += entry.size;
            }
            total = total.saturating_sub(entry.size);
            self.prune_empty_parents(&entry.path);
        }

        report.total_after = total;

        if total > self.max_bytes {
            warn!(
                "Cache still over budget after eviction: {} of {} bytes ({} in-flight files skipped)",
                total, self.max_bytes, report.in_flight_skipped
            );
        } else {
            info!(
                "Evicted {} files, freed {} bytes",
                report.files_removed, report.bytes_freed
            );
        }

        Ok(report)
    }

    /// Delete a file and, for artifacts, its record. `Ok(false)` when the
    /// file had already gone.
    fn delete_entry(&self, entry: &CacheEntry) -> CacheResult<bool> {
        let removed = match std::fs::remove_file(&entry.path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(CacheError::io(&entry.path, e)),
        };

        if entry.kind == FileKind::Artifact {
            self.store.remove(&entry.key)?;
        }

        if removed {
            debug!("Evicted {} ({} bytes)", entry.key, entry.size);
        }
        Ok(removed)
    }

    fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.cache_root || !current.starts_with(&self.cache_root) {
                break;
            }
            if std::fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::hash::Sha1Hash;
    use crate::app::models::{LocalFileState, VerificationOutcome};
    use crate::app::records::VerificationRecord;
    use filetime::FileTime;
    use tempfile::TempDir;

    const KB: u64 = 1024;

    /// Write a file with a fixed access time (seconds since the epoch) and a
    /// verification record for it
    fn write_aged(store: &RecordStore, root: &Path, rel: &str, size: u64, atime: i64) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![0u8; size as usize]).unwrap();
        let time = FileTime::from_unix_time(atime, 0);
        filetime::set_file_times(&path, time, time).unwrap();

        let state = LocalFileState::observe_blocking(&path).unwrap();
        store
            .upsert(&VerificationRecord::new(
                rel,
                &state,
                Sha1Hash::digest(b"x"),
                VerificationOutcome::Valid,
            ))
            .unwrap();
    }

    fn manager(root: &Path) -> (EvictionManager, Arc<RecordStore>, InFlightRegistry) {
        let store = Arc::new(RecordStore::open(root).unwrap());
        let registry = InFlightRegistry::new();
        let manager = EvictionManager::new(root, Arc::clone(&store), registry.clone());
        (manager, store, registry)
    }

    #[tokio::test]
    async fn test_below_threshold_does_nothing() {
        let dir = TempDir::new().unwrap();
        let (manager, store, _) = manager(dir.path());
        write_aged(&store, dir.path(), "a", 50 * KB, 1_000);

        let report = manager.enforce_limit(100 * KB, 90).await.unwrap();
        assert!(!report.triggered);
        assert_eq!(report.files_removed, 0);
        assert!(dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_unlimited_cache_never_evicts() {
        let dir = TempDir::new().unwrap();
        let (manager, store, _) = manager(dir.path());
        write_aged(&store, dir.path(), "a", 50 * KB, 1_000);

        let report = manager.enforce_limit(0, 90).await.unwrap();
        assert!(!report.triggered);
        assert!(dir.path().join("a").exists());
    }

    /// 95% usage with a 90% threshold drops to at most 80%, oldest first
    #[tokio::test]
    async fn test_evicts_oldest_until_watermark() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let (manager, store, _) = manager(root);

        // 19 files of 5 KB = 95 KB against a 100 KB budget
        for i in 0..19 {
            write_aged(&store, root, &format!("blobs/{:02}", i), 5 * KB, 1_000 + i);
        }

        let report = manager.enforce_limit(100 * KB, 90).await.unwrap();
        assert!(report.triggered);
        assert_eq!(report.total_before, 95 * KB);
        assert!(report.total_after <= 80 * KB);
        assert_eq!(report.files_removed, 3);
        assert_eq!(report.total_after, 80 * KB);

        for i in 0..3 {
            let key = format!("blobs/{:02}", i);
            assert!(!root.join(&key).exists(), "{} should be evicted", key);
            assert!(store.get(&key).unwrap().is_none());
        }
        for i in 3..19 {
            assert!(root.join(format!("blobs/{:02}", i)).exists());
        }

        // A second pass finds nothing over the threshold
        let again = manager.enforce_limit(100 * KB, 90).await.unwrap();
        assert!(!again.triggered);
        assert_eq!(again.files_removed, 0);
    }

    #[tokio::test]
    async fn test_in_flight_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let (manager, store, registry) = manager(root);

        write_aged(&store, root, "oldest", 40 * KB, 1_000);
        write_aged(&store, root, "newer", 40 * KB, 2_000);
        std::fs::write(root.join("busy.partial"), vec![0u8; 15 * KB as usize]).unwrap();
        let time = FileTime::from_unix_time(500, 0);
        filetime::set_file_times(root.join("busy.partial"), time, time).unwrap();

        let _guard = registry.reserve(&root.join("busy")).unwrap();

        let report = manager.enforce_limit(100 * KB, 90).await.unwrap();
        assert!(report.triggered);
        assert_eq!(report.in_flight_skipped, 1);
        assert!(root.join("busy.partial").exists());
        assert!(!root.join("oldest").exists());
        assert!(root.join("newer").exists());
    }

    #[tokio::test]
    async fn test_empty_directories_are_pruned() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let (manager, store, _) = manager(root);

        write_aged(&store, root, "deep/nested/old", 60 * KB, 1_000);
        write_aged(&store, root, "keep", 35 * KB, 2_000);

        manager.enforce_limit(100 * KB, 90).await.unwrap();
        assert!(!root.join("deep").exists());
        assert!(root.join("keep").exists());
        assert!(root.exists());
    }

    #[tokio::test]
    async fn test_record_store_files_are_not_counted() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let (manager, _store, _) = manager(root);

        let report = manager.enforce_limit(1, 90).await.unwrap();
        assert_eq!(report.total_before, 0);
        assert!(root.join(".verification.db").exists());
    }

    #[tokio::test]
    async fn test_concurrent_pass_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (manager, _, _) = manager(dir.path());

        let _held = manager.running.lock().await;
        let report = manager.enforce_limit(100 * KB, 90).await.unwrap();
        assert!(report.skipped);
    }

    #[test]
    fn test_watermark_defaults_below_threshold() {
        let dir = TempDir::new().unwrap();
        let (manager, _, _) = manager(dir.path());
        assert_eq!(manager.watermark_pct(90), 80);
        assert_eq!(manager.watermark_pct(5), 0);

        let custom = manager.with_target_pct(Some(50));
        assert_eq!(custom.watermark_pct(90), 50);
        assert_eq!(custom.watermark_pct(40), 40);
    }
}
