//! Error types for the pdfstitch library.
//!
//! A job is all-or-nothing, so there is a single fatal error type,
//! [`StitchError`]. The first error encountered ends the job; every scratch
//! artifact is removed before the error reaches the caller and no partial
//! output is ever made addressable.
//!
//! Callers that need a machine-readable category (an HTTP layer mapping
//! errors to status codes, a JSON report) use [`StitchError::kind`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfstitch library.
#[derive(Debug, Error)]
pub enum StitchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The submitted file list was empty.
    #[error("No files were submitted; at least one PDF, PNG or JPEG is required")]
    NoFiles,

    /// A file's extension is not one of `.pdf`, `.png`, `.jpg`, `.jpeg`.
    #[error("Unsupported file format '{extension}' for '{name}'\nAccepted: .pdf, .png, .jpg, .jpeg")]
    UnsupportedFormat { name: String, extension: String },

    /// A file exceeded the upload size ceiling.
    #[error("File '{name}' is {size} bytes; the limit is {limit} bytes")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    // ── Image errors ──────────────────────────────────────────────────────
    /// The raster image could not be decoded (corrupt or unsupported pixels).
    #[error("Failed to decode image '{name}': {detail}")]
    Decode { name: String, detail: String },

    /// The image has a zero dimension and cannot be placed on a page.
    #[error("Invalid image geometry {width}x{height}: both dimensions must be positive")]
    InvalidImage { width: u32, height: u32 },

    // ── Document errors ───────────────────────────────────────────────────
    /// A document could not be read or merged at assembly time.
    #[error("Failed to merge document {index} ('{name}'): {detail}")]
    Merge {
        index: usize,
        name: String,
        detail: String,
    },

    // ── Store errors ──────────────────────────────────────────────────────
    /// Reading, writing or deleting an artifact failed.
    #[error("Artifact I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No artifact with this name exists in the store.
    #[error("No artifact named '{name}'")]
    NotFound { name: String },

    // ── Job control ───────────────────────────────────────────────────────
    /// The job was cancelled before it finished.
    #[error("Job cancelled")]
    Cancelled,

    /// The job did not finish within the configured timeout.
    #[error("Job timed out after {secs}s")]
    Timeout { secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable category of a [`StitchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoFiles,
    UnsupportedFormat,
    FileTooLarge,
    Decode,
    InvalidImage,
    Merge,
    Io,
    NotFound,
    Cancelled,
    Timeout,
    InvalidConfig,
    Internal,
}

impl StitchError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StitchError::NoFiles => ErrorKind::NoFiles,
            StitchError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            StitchError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            StitchError::Decode { .. } => ErrorKind::Decode,
            StitchError::InvalidImage { .. } => ErrorKind::InvalidImage,
            StitchError::Merge { .. } => ErrorKind::Merge,
            StitchError::Io { .. } => ErrorKind::Io,
            StitchError::NotFound { .. } => ErrorKind::NotFound,
            StitchError::Cancelled => ErrorKind::Cancelled,
            StitchError::Timeout { .. } => ErrorKind::Timeout,
            StitchError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            StitchError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StitchError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A caller-facing failure report: error kind plus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&StitchError> for FailureReport {
    fn from(e: &StitchError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
