//! Artifact integrity verification
//!
//! Hashes artifacts against their expected SHA-1 and records the outcome.
//! A record that still matches the file's size and modification time lets a
//! later check skip hashing entirely. Compressed transfers are decompressed
//! from their staging file while being hashed, and the decompressed content is
//! moved into place by atomic rename.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use tracing::{debug, info, warn};

use crate::app::hash::Sha1Hash;
use crate::app::models::{
    partial_path, temp_path, DependencyEntry, LocalFileState, VerificationOutcome,
};
use crate::app::records::{RecordStore, VerificationRecord};
use crate::constants::files;
use crate::errors::{CacheError, CacheResult};

/// Result of one verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// What the check found
    pub outcome: VerificationOutcome,
    /// Answered from a matching record without hashing
    pub fast_path: bool,
    /// Digest of the content, when it was computed
    pub actual_hash: Option<Sha1Hash>,
    /// Size of the content that was checked
    pub actual_size: u64,
}

impl Verification {
    /// Whether the artifact is valid
    pub fn is_valid(&self) -> bool {
        self.outcome == VerificationOutcome::Valid
    }
}

/// Checks artifacts against expected digests, backed by the record store
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    cache_root: PathBuf,
    store: Arc<RecordStore>,
}

impl IntegrityVerifier {
    /// Create a verifier for artifacts under `cache_root`
    pub fn new(cache_root: impl Into<PathBuf>, store: Arc<RecordStore>) -> Self {
        Self {
            cache_root: cache_root.into(),
            store,
        }
    }

    /// Root directory artifacts live under
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Final path of an entry's artifact
    pub fn final_path(&self, entry: &DependencyEntry) -> PathBuf {
        self.cache_root.join(&entry.local_path)
    }

    /// Verify the artifact already at the entry's final path
    ///
    /// Unless `force` is set, a record whose size, modification time and
    /// expected hash all match the current file answers without hashing and
    /// without writing to the store.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::FileMissing` if there is no artifact, or a
    /// `CacheError` for read or record store failures.
    pub async fn verify(&self, entry: &DependencyEntry, force: bool) -> CacheResult<Verification> {
        let job = self.job(entry);
        tokio::task::spawn_blocking(move || job.verify_in_place(force))
            .await
            .map_err(|e| CacheError::TaskFailed(e.to_string()))?
    }

    /// Verify a completed transfer and move it to the final path
    ///
    /// Compressed staging files are decompressed into a temporary file while
    /// being hashed; undecodable data is `Corrupt` and every staging file is
    /// deleted. Content that decodes (or plain content) is renamed into place
    /// whatever its hash, and the outcome is recorded against the final file.
    ///
    /// # Errors
    ///
    /// Returns a `CacheError` if the staging file cannot be read, the
    /// artifact cannot be written or renamed, or the store write fails.
    pub async fn finalize(&self, entry: &DependencyEntry) -> CacheResult<Verification> {
        let job = self.job(entry);
        tokio::task::spawn_blocking(move || job.finalize_transfer())
            .await
            .map_err(|e| CacheError::TaskFailed(e.to_string()))?
    }

    fn job(&self, entry: &DependencyEntry) -> VerifyJob {
        VerifyJob {
            final_path: self.final_path(entry),
            key: entry.record_key(),
            expected_size: entry.expected_size,
            expected_hash: entry.expected_hash,
            compressed: entry.compressed,
            store: Arc::clone(&self.store),
        }
    }
}

struct VerifyJob {
    final_path: PathBuf,
    key: String,
    expected_size: u64,
    expected_hash: Sha1Hash,
    compressed: bool,
    store: Arc<RecordStore>,
}

impl VerifyJob {
    fn verify_in_place(self, force: bool) -> CacheResult<Verification> {
        let state = observe(&self.final_path)?;
        if !state.exists {
            return Err(CacheError::FileMissing {
                path: self.final_path,
            });
        }

        if !force {
            if let Some(record) = self.store.get(&self.key)? {
                if record.matches(&state, &self.expected_hash) {
                    debug!("Fast path: {} is {}", self.key, record.outcome);
                    return Ok(Verification {
                        outcome: record.outcome,
                        fast_path: true,
                        actual_hash: None,
                        actual_size: state.size,
                    });
                }
            }
        }

        let file = File::open(&self.final_path).map_err(|e| CacheError::io(&self.final_path, e))?;
        let (actual, size) = Sha1Hash::compute(BufReader::new(file))
            .map_err(|e| CacheError::io(&self.final_path, e))?;

        self.record(&state, actual, size)
    }

    fn finalize_transfer(self) -> CacheResult<Verification> {
        let partial = partial_path(&self.final_path);
        let partial_state = observe(&partial)?;
        if !partial_state.exists {
            return Err(CacheError::FileMissing { path: partial });
        }

        if self.compressed {
            self.finalize_compressed(&partial, partial_state)
        } else {
            self.finalize_plain(&partial)
        }
    }

    fn finalize_plain(self, partial: &Path) -> CacheResult<Verification> {
        let file = File::open(partial).map_err(|e| CacheError::io(partial, e))?;
        let (actual, size) =
            Sha1Hash::compute(BufReader::new(file)).map_err(|e| CacheError::io(partial, e))?;

        fs::rename(partial, &self.final_path).map_err(|e| CacheError::io(&self.final_path, e))?;
        let state = observe(&self.final_path)?;

        self.record(&state, actual, size)
    }

    fn finalize_compressed(
        self,
        partial: &Path,
        partial_state: LocalFileState,
    ) -> CacheResult<Verification> {
        let temp = temp_path(&self.final_path);

        match self.decompress(partial, &temp) {
            Ok(Decoded::Content { hash, size }) => {
                fs::rename(&temp, &self.final_path)
                    .map_err(|e| CacheError::io(&self.final_path, e))?;
                remove_if_present(partial)?;

                let state = observe(&self.final_path)?;
                self.record(&state, hash, size)
            }
            Ok(Decoded::Corrupt(reason)) => {
                warn!("Compressed transfer for {} is corrupt: {}", self.key, reason);
                remove_if_present(&temp)?;
                remove_if_present(partial)?;

                self.store.upsert(&VerificationRecord::new(
                    self.key.as_str(),
                    &partial_state,
                    self.expected_hash,
                    VerificationOutcome::Corrupt,
                ))?;

                Ok(Verification {
                    outcome: VerificationOutcome::Corrupt,
                    fast_path: false,
                    actual_hash: None,
                    actual_size: partial_state.size,
                })
            }
            Err(e) => {
                // Leave the partial for the next attempt; the temp file is useless.
                let _ = fs::remove_file(&temp);
                Err(e)
            }
        }
    }

    fn decompress(&self, partial: &Path, temp: &Path) -> CacheResult<Decoded> {
        let input = File::open(partial).map_err(|e| CacheError::io(partial, e))?;
        if input
            .metadata()
            .map_err(|e| CacheError::io(partial, e))?
            .len()
            == 0
        {
            return Ok(Decoded::Corrupt("empty gzip stream".to_string()));
        }

        let output = File::create(temp).map_err(|e| CacheError::io(temp, e))?;
        let mut tee = TeeReader {
            inner: MultiGzDecoder::new(BufReader::with_capacity(files::HASH_BUFFER_SIZE, input)),
            sink: output,
            write_error: None,
        };

        let hashed = Sha1Hash::compute(&mut tee);
        if let Some(e) = tee.write_error.take() {
            return Err(CacheError::io(temp, e));
        }

        match hashed {
            Ok((hash, size)) => {
                tee.sink.sync_all().map_err(|e| CacheError::io(temp, e))?;
                Ok(Decoded::Content { hash, size })
            }
            Err(e) => Ok(Decoded::Corrupt(e.to_string())),
        }
    }

    fn record(
        &self,
        state: &LocalFileState,
        actual: Sha1Hash,
        size: u64,
    ) -> CacheResult<Verification> {
        let outcome = if size == self.expected_size && actual == self.expected_hash {
            VerificationOutcome::Valid
        } else {
            VerificationOutcome::HashMismatch
        };

        match outcome {
            VerificationOutcome::Valid => debug!("Verified {}", self.key),
            _ => info!(
                "Hash mismatch for {}: expected {} ({} bytes), got {} ({} bytes)",
                self.key, self.expected_hash, self.expected_size, actual, size
            ),
        }

        self.store.upsert(&VerificationRecord::new(
            self.key.as_str(),
            state,
            self.expected_hash,
            outcome,
        ))?;

        Ok(Verification {
            outcome,
            fast_path: false,
            actual_hash: Some(actual),
            actual_size: size,
        })
    }
}

enum Decoded {
    Content { hash: Sha1Hash, size: u64 },
    Corrupt(String),
}

/// Copies everything read from `inner` into `sink`
///
/// Write failures are kept aside so they are not mistaken for bad input.
struct TeeReader<R, W> {
    inner: R,
    sink: W,
    write_error: Option<io::Error>,
}

impl<R: Read, W: Write> Read for TeeReader<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if let Err(e) = self.sink.write_all(&buf[..read]) {
            let message = e.to_string();
            self.write_error = Some(e);
            return Err(io::Error::new(io::ErrorKind::Other, message));
        }
        Ok(read)
    }
}

fn observe(path: &Path) -> CacheResult<LocalFileState> {
    LocalFileState::observe_blocking(path).map_err(|e| CacheError::io(path, e))
}

fn remove_if_present(path: &Path) -> CacheResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;
    use url::Url;

    const CONTENT: &[u8] = b"the quick brown fox jumps over the lazy dog";

    fn setup() -> (TempDir, Arc<RecordStore>, IntegrityVerifier) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        let verifier = IntegrityVerifier::new(dir.path(), Arc::clone(&store));
        (dir, store, verifier)
    }

    fn entry(content: &[u8]) -> DependencyEntry {
        DependencyEntry::new(
            Url::parse("https://mirror.example.com/blob").unwrap(),
            "packs/blob",
            content.len() as u64,
            Sha1Hash::digest(content),
        )
    }

    fn gzip(content: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap()
    }

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_verify_valid_then_fast_path() {
        let (dir, store, verifier) = setup();
        let entry = entry(CONTENT);
        write(&dir.path().join("packs/blob"), CONTENT);

        let first = verifier.verify(&entry, false).await.unwrap();
        assert!(first.is_valid());
        assert!(!first.fast_path);
        assert_eq!(first.actual_hash, Some(entry.expected_hash));

        let recorded_at = store.get("packs/blob").unwrap().unwrap().verified_at;

        let second = verifier.verify(&entry, false).await.unwrap();
        assert!(second.is_valid());
        assert!(second.fast_path);
        // Fast path never writes
        assert_eq!(
            store.get("packs/blob").unwrap().unwrap().verified_at,
            recorded_at
        );
    }

    #[tokio::test]
    async fn test_force_rehashes() {
        let (dir, _store, verifier) = setup();
        let entry = entry(CONTENT);
        write(&dir.path().join("packs/blob"), CONTENT);

        verifier.verify(&entry, false).await.unwrap();
        let forced = verifier.verify(&entry, true).await.unwrap();
        assert!(!forced.fast_path);
        assert!(forced.is_valid());
    }

    #[tokio::test]
    async fn test_mismatch_is_recorded_and_file_kept() {
        let (dir, store, verifier) = setup();
        let entry = entry(CONTENT);
        let path = dir.path().join("packs/blob");
        let mut tampered = CONTENT.to_vec();
        tampered[0] ^= 0xff;
        write(&path, &tampered);

        let result = verifier.verify(&entry, false).await.unwrap();
        assert_eq!(result.outcome, VerificationOutcome::HashMismatch);
        assert!(path.exists());
        assert_eq!(
            store.get("packs/blob").unwrap().unwrap().outcome,
            VerificationOutcome::HashMismatch
        );
    }

    /// A record for an earlier file must not vouch for a re-created one
    #[tokio::test]
    async fn test_rewritten_file_is_rehashed() {
        let (dir, _store, verifier) = setup();
        let entry = entry(CONTENT);
        let path = dir.path().join("packs/blob");
        write(&path, CONTENT);
        verifier.verify(&entry, false).await.unwrap();

        let mut tampered = CONTENT.to_vec();
        tampered[1] ^= 0xff;
        fs::write(&path, &tampered).unwrap();
        let later = filetime::FileTime::from_unix_time(2_000_000_000, 0);
        filetime::set_file_mtime(&path, later).unwrap();

        let result = verifier.verify(&entry, false).await.unwrap();
        assert!(!result.fast_path);
        assert_eq!(result.outcome, VerificationOutcome::HashMismatch);
    }

    #[tokio::test]
    async fn test_verify_missing_file() {
        let (_dir, _store, verifier) = setup();
        let result = verifier.verify(&entry(CONTENT), false).await;
        assert!(matches!(result, Err(CacheError::FileMissing { .. })));
    }

    #[tokio::test]
    async fn test_finalize_plain_renames_partial() {
        let (dir, store, verifier) = setup();
        let entry = entry(CONTENT);
        let final_path = dir.path().join("packs/blob");
        write(&partial_path(&final_path), CONTENT);

        let result = verifier.finalize(&entry).await.unwrap();
        assert!(result.is_valid());
        assert!(final_path.exists());
        assert!(!partial_path(&final_path).exists());

        let record = store.get("packs/blob").unwrap().unwrap();
        let state = LocalFileState::observe_blocking(&final_path).unwrap();
        assert!(record.matches(&state, &entry.expected_hash));
    }

    #[tokio::test]
    async fn test_finalize_compressed_materializes_content() {
        let (dir, _store, verifier) = setup();
        let compressed = gzip(CONTENT);
        let entry = entry(CONTENT).with_compression(Some(compressed.len() as u64));
        let final_path = dir.path().join("packs/blob");
        write(&partial_path(&final_path), &compressed);

        let result = verifier.finalize(&entry).await.unwrap();
        assert!(result.is_valid());
        assert_eq!(result.actual_size, CONTENT.len() as u64);
        assert_eq!(fs::read(&final_path).unwrap(), CONTENT);
        assert!(!partial_path(&final_path).exists());
        assert!(!temp_path(&final_path).exists());
    }

    #[tokio::test]
    async fn test_finalize_truncated_gzip_is_corrupt() {
        let (dir, store, verifier) = setup();
        let compressed = gzip(CONTENT);
        let entry = entry(CONTENT).with_compression(None);
        let final_path = dir.path().join("packs/blob");
        write(
            &partial_path(&final_path),
            &compressed[..compressed.len() / 2],
        );

        let result = verifier.finalize(&entry).await.unwrap();
        assert_eq!(result.outcome, VerificationOutcome::Corrupt);
        assert!(!final_path.exists());
        assert!(!partial_path(&final_path).exists());
        assert!(!temp_path(&final_path).exists());
        assert_eq!(
            store.get("packs/blob").unwrap().unwrap().outcome,
            VerificationOutcome::Corrupt
        );
    }

    #[tokio::test]
    async fn test_finalize_garbage_is_corrupt_not_mismatch() {
        let (dir, _store, verifier) = setup();
        let entry = entry(CONTENT).with_compression(None);
        let final_path = dir.path().join("packs/blob");
        write(&partial_path(&final_path), b"definitely not gzip data");

        let result = verifier.finalize(&entry).await.unwrap();
        assert_eq!(result.outcome, VerificationOutcome::Corrupt);
    }

    #[tokio::test]
    async fn test_finalize_compressed_wrong_size_is_mismatch() {
        let (dir, _store, verifier) = setup();
        let mut entry = entry(CONTENT).with_compression(None);
        entry.expected_size += 1;
        let final_path = dir.path().join("packs/blob");
        write(&partial_path(&final_path), &gzip(CONTENT));

        let result = verifier.finalize(&entry).await.unwrap();
        assert_eq!(result.outcome, VerificationOutcome::HashMismatch);
        assert!(final_path.exists());
    }
}
