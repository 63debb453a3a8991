//! Progress-callback trait for per-file job events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline stages, converts and merges each file.
//!
//! # Example
//!
//! ```rust
//! use pdfstitch::{JobProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, name: &str, _pages: Option<usize>) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("#{index} {name} ready");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn JobProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes a job.
///
/// Files are converted concurrently, so `on_file_*` may be called from
/// different threads and out of submission order. Implementations must
/// protect shared mutable state (`Mutex`, atomics). All methods default to
/// no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// Called once after the file list has been validated.
    fn on_job_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a staged file starts converting. Every file has been
    /// staged by then; with `concurrency > 1` several files may be in
    /// flight at once, so starts arrive out of submission order.
    ///
    /// `index` is the 0-based submission position.
    fn on_file_start(&self, index: usize, name: &str) {
        let _ = (index, name);
    }

    /// Called when a file has become a document ready for assembly.
    ///
    /// `pages` is `Some(1)` for converted images and `None` for pass-through
    /// PDFs, which are not parsed until assembly.
    fn on_file_complete(&self, index: usize, name: &str, pages: Option<usize>) {
        let _ = (index, name, pages);
    }

    /// Called when a file fails. The job fails with it.
    fn on_file_error(&self, index: usize, name: &str, error: &str) {
        let _ = (index, name, error);
    }

    /// Called once after the merged output has been stored.
    fn on_job_complete(&self, output_name: &str, total_pages: Option<usize>) {
        let _ = (output_name, total_pages);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
