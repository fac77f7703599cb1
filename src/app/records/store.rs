//! SQLite-backed verification record store
//!
//! One database file lives at the cache root. Writes go through a single
//! connection behind a mutex, so concurrent workers serialize on it; the
//! database runs in WAL mode with full synchronous commits so a record that
//! was acknowledged survives a crash.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::record::VerificationRecord;
use crate::app::cache::scan::{DirectoryScanner, FileKind};
use crate::app::hash::Sha1Hash;
use crate::app::models::VerificationOutcome;
use crate::constants::files;
use crate::errors::{StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS verified_files (
    file_path TEXT PRIMARY KEY,
    file_size INTEGER NOT NULL,
    modified_ns INTEGER NOT NULL,
    expected_hash TEXT NOT NULL,
    verified_at TEXT NOT NULL,
    outcome TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_verified_at ON verified_files(verified_at);
CREATE INDEX IF NOT EXISTS idx_outcome ON verified_files(outcome);
"#;

/// Aggregate view of the store and the cache directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Live records (valid + mismatched + corrupt)
    pub total: u64,
    /// Records whose file verified
    pub valid: u64,
    /// Records whose file hashed to the wrong digest
    pub mismatched: u64,
    /// Records of transfers that failed to decompress
    pub corrupt: u64,
    /// Artifacts on disk with no record
    pub never_verified: u64,
    /// Records whose file no longer exists (ignored in the counts above)
    pub stale: u64,
    /// Staging files left by unfinished transfers
    pub partial_files: u64,
    /// Records written since local midnight
    pub recent_verifications: u64,
    /// Size of the database file in bytes
    pub database_size_bytes: u64,
}

/// Durable verification record store
#[derive(Debug)]
pub struct RecordStore {
    conn: Mutex<Connection>,
    cache_root: PathBuf,
    db_path: PathBuf,
}

impl RecordStore {
    /// Open (creating if needed) the store for a cache root
    ///
    /// # Arguments
    ///
    /// * `cache_root` - Directory the store lives in and whose files it describes
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the directory cannot be created or the database
    /// cannot be opened and initialized.
    pub fn open(cache_root: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(cache_root)?;
        let db_path = cache_root.join(files::RECORD_STORE_FILE);

        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;

        debug!("Opened verification store at {}", db_path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            cache_root: cache_root.to_path_buf(),
            db_path,
        })
    }

    /// Location of the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Cache root the records are relative to
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself intact.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the record for a path
    pub fn get(&self, path: &str) -> StoreResult<Option<VerificationRecord>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT file_size, modified_ns, expected_hash, verified_at, outcome
                 FROM verified_files WHERE file_path = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(size, modified_ns, hash, verified_at, outcome)| {
            decode_record(path, size, modified_ns, &hash, &verified_at, &outcome)
        })
        .transpose()
    }

    /// Insert or replace the record for `record.path`
    pub fn upsert(&self, record: &VerificationRecord) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO verified_files
                 (file_path, file_size, modified_ns, expected_hash, verified_at, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(file_path) DO UPDATE SET
                 file_size = excluded.file_size,
                 modified_ns = excluded.modified_ns,
                 expected_hash = excluded.expected_hash,
                 verified_at = excluded.verified_at,
                 outcome = excluded.outcome",
            params![
                record.path,
                i64::try_from(record.size).unwrap_or(i64::MAX),
                record.modified_ns,
                record.expected_hash.to_hex(),
                VerificationRecord::format_timestamp(&record.verified_at),
                record.outcome.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Delete the record for a path; returns whether one existed
    pub fn remove(&self, path: &str) -> StoreResult<bool> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM verified_files WHERE file_path = ?1",
            params![path],
        )?;
        Ok(removed > 0)
    }

    /// Delete records whose file no longer exists
    ///
    /// Corrupt records are kept: their artifacts are deleted on purpose and the
    /// record is the only trace of the failure.
    pub fn purge_stale(&self) -> StoreResult<usize> {
        let stale: Vec<String> = self
            .load_outcomes()?
            .into_iter()
            .filter(|(path, outcome)| {
                *outcome != VerificationOutcome::Corrupt && !self.cache_root.join(path).is_file()
            })
            .map(|(path, _)| path)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for path in &stale {
            tx.execute(
                "DELETE FROM verified_files WHERE file_path = ?1",
                params![path],
            )?;
        }
        tx.commit()?;

        info!("Purged {} stale verification records", stale.len());
        Ok(stale.len())
    }

    /// Make every acknowledged write durable in the main database file
    pub fn flush(&self) -> StoreResult<()> {
        let conn = self.lock();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        debug!("Checkpointed verification store");
        Ok(())
    }

    /// Run a store operation on the blocking thread pool
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or `StoreError::TaskFailed` if the
    /// blocking task panicked.
    pub async fn blocking<T, F>(store: &Arc<Self>, op: F) -> StoreResult<T>
    where
        F: FnOnce(&RecordStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }

    /// Count records by outcome and artifacts without records
    ///
    /// Read-only: walks the cache root and queries the database without
    /// modifying either.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let mut stats = StoreStats::default();
        let mut recorded = HashSet::new();

        for (path, outcome) in self.load_outcomes()? {
            let live = match outcome {
                VerificationOutcome::Corrupt => true,
                _ => self.cache_root.join(&path).is_file(),
            };

            if !live {
                stats.stale += 1;
                continue;
            }

            match outcome {
                VerificationOutcome::Valid => stats.valid += 1,
                VerificationOutcome::HashMismatch => stats.mismatched += 1,
                VerificationOutcome::Corrupt => stats.corrupt += 1,
            }
            stats.total += 1;
            recorded.insert(path);
        }

        let files = DirectoryScanner::scan_blocking(&self.cache_root)
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        for file in files {
            match file.kind {
                FileKind::Artifact if !recorded.contains(&file.key) => stats.never_verified += 1,
                FileKind::Artifact => {}
                FileKind::Partial | FileKind::Temp => stats.partial_files += 1,
            }
        }

        stats.recent_verifications = self.count_since(local_midnight_utc())?;
        stats.database_size_bytes = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(stats)
    }

    /// Number of records verified at or after `since`
    pub fn count_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM verified_files WHERE verified_at >= ?1",
            params![VerificationRecord::format_timestamp(&since)],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn load_outcomes(&self) -> StoreResult<Vec<(String, VerificationOutcome)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT file_path, outcome FROM verified_files")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(path, outcome)| {
                let parsed =
                    VerificationOutcome::parse(&outcome).ok_or_else(|| StoreError::CorruptRecord {
                        path: path.clone(),
                        reason: format!("unknown outcome {:?}", outcome),
                    })?;
                Ok((path, parsed))
            })
            .collect()
    }
}

fn decode_record(
    path: &str,
    size: i64,
    modified_ns: i64,
    hash: &str,
    verified_at: &str,
    outcome: &str,
) -> StoreResult<VerificationRecord> {
    let corrupt = |reason: String| StoreError::CorruptRecord {
        path: path.to_string(),
        reason,
    };

    let expected_hash = Sha1Hash::from_hex(hash).map_err(|e| corrupt(e.to_string()))?;
    let verified_at = DateTime::parse_from_rfc3339(verified_at)
        .map_err(|e| corrupt(e.to_string()))?
        .with_timezone(&Utc);
    let outcome = VerificationOutcome::parse(outcome)
        .ok_or_else(|| corrupt(format!("unknown outcome {:?}", outcome)))?;

    Ok(VerificationRecord {
        path: path.to_string(),
        size: u64::try_from(size).map_err(|e| corrupt(e.to_string()))?,
        modified_ns,
        expected_hash,
        verified_at,
        outcome,
    })
}

fn local_midnight_utc() -> DateTime<Utc> {
    let today = Local::now().date_naive().and_time(NaiveTime::MIN);
    today
        .and_local_timezone(Local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}
