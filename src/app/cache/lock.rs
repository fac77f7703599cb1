//! Advisory lock on the cache root
//!
//! Fetch and evict both remove files under the cache root. Only the process
//! holding this lock knows which paths are in flight, so the two commands
//! never run against the same root at once. Stats only reads and does not
//! take the lock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::constants::files;
use crate::errors::{CacheError, CacheResult};

/// Guard for the cache lock, released when dropped
///
/// The lock file itself stays in place; only the OS lock on it is released.
#[derive(Debug)]
pub struct CacheLock {
    _file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Take the exclusive lock for `cache_root` without waiting
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Locked`] if another holder has it, or
    /// [`CacheError::Io`] if the lock file cannot be opened.
    pub fn acquire(cache_root: &Path) -> CacheResult<Self> {
        let path = cache_root.join(files::LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CacheError::io(&path, e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(CacheError::Locked { path });
        }

        debug!("Acquired cache lock {}", path.display());
        Ok(Self { _file: file, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
