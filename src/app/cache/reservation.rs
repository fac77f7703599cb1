//! In-flight path registry
//!
//! Workers reserve an artifact's final path for the whole time they stage,
//! transfer or finalize it. Eviction consults the same registry so it never
//! deletes bytes a worker is still writing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared set of final paths currently being worked on
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InFlightRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a path; returns `None` if it is already reserved
    ///
    /// The reservation is released when the returned guard is dropped.
    pub fn reserve(&self, path: &Path) -> Option<InFlightGuard> {
        if self.lock().insert(path.to_path_buf()) {
            Some(InFlightGuard {
                registry: self.clone(),
                path: path.to_path_buf(),
            })
        } else {
            None
        }
    }

    /// Whether a path is currently reserved
    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    /// Number of reserved paths
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is reserved
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run `f` only if `path` is not reserved, holding the registry lock
    ///
    /// No reservation for `path` can be taken while `f` runs, so a file
    /// deleted inside `f` cannot be one a worker has just started on.
    pub fn with_idle<T>(&self, path: &Path, f: impl FnOnce() -> T) -> Option<T> {
        let paths = self.lock();
        if paths.contains(path) {
            None
        } else {
            let result = f();
            drop(paths);
            Some(result)
        }
    }
}

/// Reservation held by a worker; releases the path on drop
#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlightRegistry,
    path: PathBuf,
}

impl InFlightGuard {
    /// Reserved path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.path);
    }
}
