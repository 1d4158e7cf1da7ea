//! JSON normalization, so diffs of reformatted JSON show only real changes.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{CacheStats, MemoCache};
use crate::error::{DiffError, DiffResult};
use crate::identity::absolute;
use crate::pdiff::{ArtifactStore, DiffArtifact};

/// Rewrites JSON files with sorted keys and two-space indentation.
///
/// Keys come out sorted because `serde_json` objects are ordered maps unless
/// its `preserve_order` feature is enabled.
#[derive(Debug)]
pub struct JsonNormalizer {
    artifacts: ArtifactStore,
    /// `None` for files that are not JSON.
    normalized: MemoCache<PathBuf, Option<DiffArtifact>>,
}

impl JsonNormalizer {
    /// Create a normalizer remembering at most `capacity` files.
    ///
    /// With `delete_evicted` set, the normalized copy behind an evicted entry
    /// is deleted from disk.
    #[must_use]
    pub fn new(artifacts: ArtifactStore, capacity: usize, delete_evicted: bool) -> Self {
        let mut normalized = MemoCache::bounded("normalize_json", capacity);
        if delete_evicted {
            normalized = normalized.with_evict_hook(Box::new(
                |_: &PathBuf, copy: &Option<DiffArtifact>| {
                    if let Some(artifact) = copy {
                        artifact.discard();
                    }
                },
            ));
        }
        Self {
            artifacts,
            normalized,
        }
    }

    /// Path of a normalized copy of the JSON file at `path`.
    ///
    /// Files that do not parse as JSON are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Io`] if the file cannot be read or the copy
    /// cannot be written.
    pub fn normalize(&self, path: &Path) -> DiffResult<PathBuf> {
        let key = absolute(path)?;
        let copy = self
            .normalized
            .get_or_try_insert_with(&key, || self.write_normalized(&key))?;
        Ok(copy.map_or(key, DiffArtifact::into_path))
    }

    fn write_normalized(&self, path: &Path) -> DiffResult<Option<DiffArtifact>> {
        let text = fs::read_to_string(path).map_err(|e| DiffError::io(path, e))?;
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("Unable to parse {} as JSON: {}", path.display(), e);
                return Ok(None);
            }
        };

        let pretty =
            serde_json::to_string_pretty(&value).map_err(|e| DiffError::io(path, e.into()))?;
        let artifact = self.artifacts.allocate("json")?;
        if let Err(e) = fs::write(artifact.path(), pretty) {
            artifact.discard();
            return Err(DiffError::io(artifact.path(), e));
        }

        log::debug!(
            "Normalized JSON {} -> {}",
            path.display(),
            artifact.path().display()
        );
        Ok(Some(artifact))
    }

    /// Cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.normalized.stats()
    }
}
