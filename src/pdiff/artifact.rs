//! Temporary image files produced by the pipeline.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{DiffError, DiffResult};

/// File name prefix for every artifact, so stray files are easy to sweep.
pub const ARTIFACT_PREFIX: &str = "webdiff-";

/// A temporary file owned by the pipeline.
///
/// Artifacts are not deleted on drop. They live as long as the cache entry
/// that produced them; an evicted entry's file is removed when the owning
/// cache was configured to do so, anything left over is up to the OS temp
/// directory policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DiffArtifact {
    path: PathBuf,
}

impl DiffArtifact {
    /// Path of the artifact on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume the artifact, returning its path.
    #[must_use]
    pub fn into_path(self) -> PathBuf {
        self.path
    }

    /// Delete the file, ignoring a file that is already gone.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Delete the file, logging instead of failing.
    pub(crate) fn discard(&self) {
        if let Err(e) = self.remove() {
            log::warn!("Failed to remove {}: {}", self.path.display(), e);
        } else {
            log::debug!("Removed artifact {}", self.path.display());
        }
    }
}

/// Allocates fresh artifact files.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    dir: Option<PathBuf>,
}

impl ArtifactStore {
    /// Allocate artifacts in `dir`, or the system temp directory when `None`.
    #[must_use]
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Directory new artifacts are created in.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Create a new empty file with the given extension.
    ///
    /// Every call returns a distinct path.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Io`] if the file cannot be created.
    pub fn allocate(&self, extension: &str) -> DiffResult<DiffArtifact> {
        let dir = self.dir();
        let suffix = format!(".{extension}");
        let (_file, path) = tempfile::Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&dir)
            .map_err(|e| DiffError::io(&dir, e))?
            .keep()
            .map_err(|e| DiffError::io(&dir, e.error))?;
        Ok(DiffArtifact { path })
    }
}
