//! Cache directory scanning
//!
//! Enumerates every file under the cache root together with its size and last
//! access time. The record database and its sidecars are never reported.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::app::models::{is_reserved_name, record_key};
use crate::constants::files;
use crate::errors::{CacheError, CacheResult};

/// Role of a file found under the cache root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A cached artifact at its final path
    Artifact,
    /// A `.partial` staging file
    Partial,
    /// A `.tmp` decompression file
    Temp,
}

/// A file under the cache root
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the cache root, `/`-separated
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last access time, falling back to modification time
    pub last_access: SystemTime,
    /// Artifact or staging file
    pub kind: FileKind,
}

impl CacheEntry {
    /// Final artifact path this file belongs to
    ///
    /// Staging files map to the artifact they are being built for.
    pub fn owner_path(&self) -> PathBuf {
        let suffix = match self.kind {
            FileKind::Artifact => return self.path.clone(),
            FileKind::Partial => files::PARTIAL_SUFFIX,
            FileKind::Temp => files::TEMP_FILE_SUFFIX,
        };

        let raw = self.path.as_os_str().to_string_lossy();
        PathBuf::from(raw.strip_suffix(suffix).unwrap_or(&raw).to_string())
    }
}

/// Directory scanner for the cache root
pub struct DirectoryScanner;

impl DirectoryScanner {
    /// Scan the cache root without blocking the async runtime
    pub async fn scan(cache_root: &Path) -> CacheResult<Vec<CacheEntry>> {
        let cache_root = cache_root.to_path_buf();

        tokio::task::spawn_blocking(move || Self::scan_blocking(&cache_root))
            .await
            .map_err(|e| CacheError::TaskFailed(e.to_string()))?
    }

    /// Recursively list files under `cache_root`
    ///
    /// A missing root yields an empty list. Files that vanish mid-scan are
    /// skipped; symlinks are never followed.
    pub fn scan_blocking(cache_root: &Path) -> CacheResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        match Self::scan_directory(cache_root, cache_root, &mut entries) {
            Ok(()) => Ok(entries),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !cache_root.exists() => Ok(entries),
            Err(e) => Err(CacheError::io(cache_root, e)),
        }
    }

    fn scan_directory(root: &Path, dir: &Path, out: &mut Vec<CacheEntry>) -> io::Result<()> {
        for dir_entry in std::fs::read_dir(dir)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();

            let metadata = match std::fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            if metadata.is_dir() {
                match Self::scan_directory(root, &path, out) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                continue;
            }

            if !metadata.is_file() {
                continue;
            }

            let file_name = dir_entry.file_name();
            let file_name = file_name.to_string_lossy();
            if is_reserved_name(&file_name) {
                continue;
            }

            let kind = if file_name.ends_with(files::PARTIAL_SUFFIX) {
                FileKind::Partial
            } else if file_name.ends_with(files::TEMP_FILE_SUFFIX) {
                FileKind::Temp
            } else {
                FileKind::Artifact
            };

            let last_access = metadata
                .accessed()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            let relative = path.strip_prefix(root).unwrap_or(&path);

            out.push(CacheEntry {
                key: record_key(relative),
                path,
                size: metadata.len(),
                last_access,
                kind,
            });
        }

        Ok(())
    }

    /// Total bytes of the given entries
    pub fn total_size(entries: &[CacheEntry]) -> u64 {
        entries.iter().map(|entry| entry.size).sum()
    }
}
