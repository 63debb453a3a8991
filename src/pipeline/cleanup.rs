//! Scoped cleanup of scratch artifacts.
//!
//! Every scratch file a job creates is registered here the moment it exists.
//! Dropping the list removes the files in reverse registration order, so
//! success, early return, error, cancellation (the job future is dropped)
//! and panics all leave the scratch area empty. Removal failures are logged
//! and never turn a successful job into a failed one.

use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Files to delete when the owning job ends.
///
/// Registration takes `&self` so concurrent conversions within a job can
/// share one list.
#[derive(Debug, Default)]
pub struct CleanupList {
    paths: Mutex<Vec<PathBuf>>,
}

impl CleanupList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` for deletion at job end.
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!("Registered scratch artifact {}", path.display());
        self.lock().push(path);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Delete everything registered so far, newest first, and return how
    /// many files were actually removed.
    pub fn run(&self) -> usize {
        let paths = std::mem::take(&mut *self.lock());
        let mut removed = 0;
        for path in paths.iter().rev() {
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                // Already consumed earlier in the job.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove scratch artifact {}: {}", path.display(), e),
            }
        }
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        // A poisoned list still holds valid paths.
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CleanupList {
    fn drop(&mut self) {
        let removed = self.run();
        if removed > 0 {
            debug!("Cleaned up {} scratch artifacts", removed);
        }
    }
}
