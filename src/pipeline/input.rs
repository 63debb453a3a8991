//! Source files: classification by extension and the upload boundary.
//!
//! Kind is derived from the file name alone, case-insensitively; content is
//! never sniffed here. Unsupported extensions are rejected before any
//! artifact is created, so a bad name costs nothing to clean up.

use crate::error::StitchError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// What a source file contributes to the merged document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A PDF, passed through with all of its pages.
    Document,
    /// A PNG or JPEG, converted to exactly one page.
    RasterImage,
}

impl SourceKind {
    /// Classify a file name by its extension.
    ///
    /// # Errors
    /// [`StitchError::UnsupportedFormat`] for anything other than
    /// `.pdf`, `.png`, `.jpg`, `.jpeg` (any case).
    pub fn from_name(name: &str) -> Result<Self, StitchError> {
        let extension = extension_of(name);
        match extension.as_str() {
            ".pdf" => Ok(SourceKind::Document),
            ".png" | ".jpg" | ".jpeg" => Ok(SourceKind::RasterImage),
            _ => Err(StitchError::UnsupportedFormat {
                name: name.to_string(),
                extension,
            }),
        }
    }
}

/// Lower-cased suffix of the last path element, from its final dot, or an
/// empty string. A bare `.pdf` counts as a PDF.
fn extension_of(name: &str) -> String {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    file_name
        .rfind('.')
        .map(|dot| file_name[dot..].to_lowercase())
        .unwrap_or_default()
}

/// One uploaded file: its name, bytes and derived kind.
#[derive(Clone)]
pub struct SourceFile {
    name: String,
    content: Vec<u8>,
    kind: SourceKind,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("bytes", &self.content.len())
            .field("kind", &self.kind)
            .finish()
    }
}

impl SourceFile {
    /// Classify and wrap an in-memory upload.
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Result<Self, StitchError> {
        let name = name.into();
        let kind = SourceKind::from_name(&name)?;
        Ok(Self {
            name,
            content,
            kind,
        })
    }

    /// Read a local file through the upload boundary.
    ///
    /// The extension is checked first and the size ceiling is checked from
    /// metadata before any bytes are read.
    pub async fn from_path(path: impl AsRef<Path>, max_bytes: u64) -> Result<Self, StitchError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let kind = SourceKind::from_name(&name)?;

        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| StitchError::io(path, e))?;
        check_size(&name, meta.len(), max_bytes)?;

        let content = tokio::fs::read(path)
            .await
            .map_err(|e| StitchError::io(path, e))?;
        // The file may have grown between stat and read.
        check_size(&name, content.len() as u64, max_bytes)?;

        debug!("Read {} ({:?}, {} bytes)", name, kind, content.len());
        Ok(Self {
            name,
            content,
            kind,
        })
    }

    /// Enforce the boundary size ceiling on an already-received upload.
    pub fn check_size(&self, max_bytes: u64) -> Result<(), StitchError> {
        check_size(&self.name, self.content.len() as u64, max_bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Give up ownership of the bytes.
    pub fn into_parts(self) -> (String, SourceKind, Vec<u8>) {
        (self.name, self.kind, self.content)
    }
}

fn check_size(name: &str, size: u64, limit: u64) -> Result<(), StitchError> {
    if size > limit {
        return Err(StitchError::FileTooLarge {
            name: name.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

static RE_UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Scratch file name for the upload at submission position `index`.
///
/// The index prefix keeps names distinct when two uploads share a name; the
/// rest is the upload's base name with anything outside `[A-Za-z0-9._-]`
/// replaced, so it can never escape the scratch directory.
pub fn staged_name(index: usize, name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned = RE_UNSAFE_NAME_CHARS.replace_all(&base, "_");
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        format!("{index:03}_upload")
    } else {
        format!("{index:03}_{cleaned}")
    }
}
