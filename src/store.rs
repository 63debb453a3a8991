//! Directory-backed artifact store.
//!
//! Both the per-job scratch area and the output store are an
//! [`ArtifactStore`]: a flat directory of named files with
//! `store` / `load` / `delete`. Writes go to a temporary file in the same
//! directory and are renamed into place, so a reader never sees a partial
//! artifact, and an existing name is never overwritten.
//!
//! Names must be plain file names. Anything with a path separator, a
//! leading dot or `..` is treated as absent by `load` and rejected by
//! `store`, so a name taken from a download URL cannot escape the root.

use crate::error::StitchError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name and location of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub name: String,
    pub path: PathBuf,
}

/// A flat directory of immutable, named artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// `true` if `name` is a bare file name that stays inside the store root.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().map(|n| n == name).unwrap_or(false)
}

impl ArtifactStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StitchError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StitchError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Atomically create the artifact `name` holding `bytes`.
    ///
    /// # Errors
    /// [`StitchError::Io`] if the name is not a plain file name, already
    /// exists, or the write fails.
    pub async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<ArtifactHandle, StitchError> {
        let path = self.path_of(name);
        if !is_plain_name(name) {
            return Err(StitchError::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "artifact names must be plain file names",
                ),
            ));
        }

        let root = self.root.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StitchError> {
            let mut tmp =
                tempfile::NamedTempFile::new_in(&root).map_err(|e| StitchError::io(&root, e))?;
            tmp.write_all(&bytes)
                .and_then(|_| tmp.as_file().sync_all())
                .map_err(|e| StitchError::io(tmp.path(), e))?;
            tmp.persist_noclobber(&target)
                .map_err(|e| StitchError::io(&target, e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StitchError::Internal(format!("Store task panicked: {}", e)))??;

        debug!("Stored artifact {}", path.display());
        Ok(ArtifactHandle {
            name: name.to_string(),
            path,
        })
    }

    /// Read the artifact `name`.
    ///
    /// # Errors
    /// [`StitchError::NotFound`] if no such artifact exists or `name` is not a
    /// plain file name.
    pub async fn load(&self, name: &str) -> Result<Vec<u8>, StitchError> {
        if !is_plain_name(name) {
            return Err(StitchError::NotFound {
                name: name.to_string(),
            });
        }
        let path = self.path_of(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StitchError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(StitchError::io(path, e)),
        }
    }

    /// Remove the artifact `name`. Removing a missing artifact is not an error.
    pub async fn delete(&self, name: &str) -> Result<(), StitchError> {
        if !is_plain_name(name) {
            return Ok(());
        }
        let path = self.path_of(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted artifact {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StitchError::io(path, e)),
        }
    }

    /// Whether the artifact `name` exists.
    pub async fn exists(&self, name: &str) -> bool {
        is_plain_name(name) && tokio::fs::try_exists(self.path_of(name)).await.unwrap_or(false)
    }

    /// Names of all complete artifacts, sorted. In-flight temporary files are
    /// not listed.
    pub async fn list(&self) -> Result<Vec<String>, StitchError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StitchError::io(&self.root, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StitchError::io(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_plain_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
