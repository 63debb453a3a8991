//! # pdfstitch
//!
//! Merge an ordered mix of PDFs and raster images (PNG, JPEG) into a single
//! PDF.
//!
//! ## Why this crate?
//!
//! Scanned receipts, phone photos and exported reports rarely arrive in one
//! format. This crate turns each image into one A4 page, with the image
//! centred and scaled down only when it would not fit inside the margins.
//! PDFs pass through with all their pages. Everything is then concatenated
//! in exactly the order it was submitted. A job is all-or-nothing: the first
//! bad file fails the whole job and every intermediate file is removed.
//!
//! ## Pipeline Overview
//!
//! ```text
//! [a.png, b.pdf, c.jpg]
//!  │
//!  ├─ 1. Input     classify by extension, reject anything else
//!  ├─ 2. Stage     per-job scratch directory, scoped cleanup
//!  ├─ 3. Image     decode → fit on A4 → one-page PDF (spawn_blocking)
//!  ├─ 4. Assemble  concatenate in submission order (lopdf)
//!  └─ 5. Store     atomic publish as merged_<timestamp>_<job>.pdf
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfstitch::{ConversionPipeline, PipelineConfig, SourceFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .scratch_dir("uploads")
//!         .output_dir("output")
//!         .build()?;
//!     let pipeline = ConversionPipeline::new(config);
//!
//!     let files = vec![
//!         SourceFile::new("a.png", std::fs::read("a.png")?)?,
//!         SourceFile::new("b.pdf", std::fs::read("b.pdf")?)?,
//!     ];
//!     let output = pipeline.run(files).await?;
//!     println!("{}", output.name);
//!
//!     let bytes = pipeline.fetch(&output.name).await?;
//!     eprintln!("{} bytes", bytes.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfstitch` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfstitch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod geometry;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelToken;
pub use config::{PipelineConfig, PipelineConfigBuilder, DEFAULT_MAX_FILE_BYTES};
pub use error::{ErrorKind, FailureReport, StitchError};
pub use geometry::{fit, FitResult, PageGeometry, A4_GEOMETRY};
pub use job::{ConversionPipeline, ConvertedDocument, MergeJob};
pub use output::{JobState, JobStats, OutputDocument};
pub use pipeline::input::{SourceFile, SourceKind};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{ArtifactHandle, ArtifactStore};
