//! Configuration for the conversion-and-merge pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`] and handed to
//! [`crate::ConversionPipeline::new`]. The config is immutable once built and
//! cheap to clone, so concurrent jobs share it freely.
//!
//! Page geometry is intentionally absent: all jobs use
//! [`crate::geometry::A4_GEOMETRY`].

use crate::error::StitchError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// Upload size ceiling applied at the transport boundary: 32 MiB.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 32 << 20;

/// Configuration for a [`crate::ConversionPipeline`].
///
/// # Example
/// ```rust
/// use pdfstitch::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .scratch_dir("/var/tmp/pdfstitch/uploads")
///     .output_dir("/var/tmp/pdfstitch/output")
///     .concurrency(8)
///     .job_timeout_secs(Some(120))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Parent directory of the per-job scratch directories. Default: `uploads`.
    ///
    /// Each job creates one uniquely named subdirectory and removes it,
    /// with everything in it, when the job ends.
    pub scratch_dir: PathBuf,

    /// Root of the output store. Default: `output`.
    pub output_dir: PathBuf,

    /// Per-file size ceiling in bytes for the boundary reader. Default: 32 MiB.
    ///
    /// Checked by [`crate::SourceFile::from_path`] and
    /// [`crate::SourceFile::check_size`], not by the pipeline itself.
    pub max_file_bytes: u64,

    /// Maximum number of files converted at once within one job. Default: 4.
    pub concurrency: usize,

    /// Whole-job timeout in seconds. `None` disables it. Default: 300.
    pub job_timeout_secs: Option<u64>,

    /// Prefix of generated output names. Default: `merged`.
    pub output_prefix: String,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("output"),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            concurrency: 4,
            job_timeout_secs: Some(300),
            output_prefix: "merged".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("scratch_dir", &self.scratch_dir)
            .field("output_dir", &self.output_dir)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("concurrency", &self.concurrency)
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("output_prefix", &self.output_prefix)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn job_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.job_timeout_secs = secs;
        self
    }

    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output_prefix = prefix.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, StitchError> {
        let c = &self.config;
        if c.max_file_bytes == 0 {
            return Err(StitchError::InvalidConfig(
                "max_file_bytes must be ≥ 1".into(),
            ));
        }
        if c.job_timeout_secs == Some(0) {
            return Err(StitchError::InvalidConfig(
                "job timeout must be ≥ 1s (use None to disable)".into(),
            ));
        }
        if c.output_prefix.is_empty()
            || !c
                .output_prefix
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(StitchError::InvalidConfig(format!(
                "output prefix must be non-empty [A-Za-z0-9_-], got '{}'",
                c.output_prefix
            )));
        }
        if c.scratch_dir == c.output_dir {
            return Err(StitchError::InvalidConfig(
                "scratch_dir and output_dir must differ".into(),
            ));
        }
        Ok(self.config)
    }
}
