//! Perceptual image diffs.
//!
//! Three memoized stages, each backed by one toolkit invocation:
//!
//! 1. [`PerceptualDiff::generate_diff`]: `compare` two images into a diff image
//!    with differing pixels highlighted.
//! 2. [`PerceptualDiff::dilate`]: grow the highlighted regions of a diff image
//!    so single-pixel changes are visible.
//! 3. [`PerceptualDiff::extract_bounding_box`]: the rectangle enclosing the
//!    highlighted pixels.
//!
//! Every stage checks toolkit availability first and returns
//! [`DiffError::ToolUnavailable`] without launching anything when it is
//! missing. Only successful results are cached.
//!
//! Diff images live as long as their cache entry. Callers that chain stages
//! for one pair should go through [`PerceptualDiff::with_diff`], which
//! regenerates a diff image evicted between the two steps.

pub mod artifact;

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use artifact::{ArtifactStore, DiffArtifact};

use crate::cache::{CacheStats, MemoCache};
use crate::error::{DiffError, DiffResult, ToolFailure};
use crate::identity::absolute;
use crate::magick::{
    parse_geometry, BoundingBox, Toolkit, COMPARE_DISSIMILAR, COMPARE_FAILED, COMPARE_SIMILAR,
};

/// Result of comparing two images.
///
/// Both variants carry the diff image `compare` wrote. For similar images it
/// shows no highlighted pixels but is still a valid input for the later
/// stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "artifact", rename_all = "lowercase")]
pub enum DiffOutcome {
    /// `compare` found the images similar.
    Identical(DiffArtifact),
    /// `compare` found the images dissimilar.
    Different(DiffArtifact),
}

impl DiffOutcome {
    /// The diff image, whatever the outcome.
    #[must_use]
    pub fn artifact(&self) -> &DiffArtifact {
        match self {
            Self::Identical(artifact) | Self::Different(artifact) => artifact,
        }
    }

    /// Whether the images were found similar.
    #[must_use]
    pub fn is_identical(&self) -> bool {
        matches!(self, Self::Identical(_))
    }
}

/// Per-stage cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerceptualStats {
    /// `compare` cache
    pub diffs: CacheStats,
    /// Dilation cache
    pub dilations: CacheStats,
    /// Bounding box cache
    pub bounding_boxes: CacheStats,
}

/// Memoized perceptual diff stages.
#[derive(Debug)]
pub struct PerceptualDiff {
    toolkit: Arc<Toolkit>,
    artifacts: ArtifactStore,
    diffs: MemoCache<(PathBuf, PathBuf), DiffOutcome>,
    dilated: MemoCache<PathBuf, DiffArtifact>,
    bounding_boxes: MemoCache<PathBuf, BoundingBox>,
}

impl PerceptualDiff {
    /// Create the stages with caches of `capacity` entries each.
    ///
    /// With `delete_evicted` set, the image behind an evicted diff or dilation
    /// entry is deleted from disk.
    #[must_use]
    pub fn new(
        toolkit: Arc<Toolkit>,
        artifacts: ArtifactStore,
        capacity: usize,
        delete_evicted: bool,
    ) -> Self {
        let mut diffs = MemoCache::bounded("pdiff", capacity);
        let mut dilated = MemoCache::bounded("dilate", capacity);
        if delete_evicted {
            diffs = diffs.with_evict_hook(Box::new(|_: &(PathBuf, PathBuf), outcome: &DiffOutcome| {
                outcome.artifact().discard();
            }));
            dilated = dilated.with_evict_hook(Box::new(|_: &PathBuf, artifact: &DiffArtifact| {
                artifact.discard();
            }));
        }

        Self {
            toolkit,
            artifacts,
            diffs,
            dilated,
            bounding_boxes: MemoCache::bounded("bbox", capacity),
        }
    }

    /// Toolkit handle shared by the stages.
    #[must_use]
    pub fn toolkit(&self) -> &Arc<Toolkit> {
        &self.toolkit
    }

    /// Compare two images, writing a diff image to a fresh artifact.
    ///
    /// # Errors
    ///
    /// - [`DiffError::ToolUnavailable`] if the toolkit is missing
    /// - [`DiffError::ToolFailed`] if `compare` fails (exit 2, usually because
    ///   the dimensions differ), exits unexpectedly or times out
    /// - [`DiffError::Io`] if no artifact file can be created
    pub fn generate_diff(&self, before: &Path, after: &Path) -> DiffResult<DiffOutcome> {
        self.toolkit.ensure_available()?;
        let key = (absolute(before)?, absolute(after)?);
        self.diffs
            .get_or_try_insert_with(&key, || self.run_compare(&key.0, &key.1))
    }

    fn run_compare(&self, before: &Path, after: &Path) -> DiffResult<DiffOutcome> {
        let artifact = self.artifacts.allocate("png")?;
        let command = self.toolkit.compare_command(before, after, artifact.path());

        let output = match self.toolkit.run(&command) {
            Ok(output) => output,
            Err(failure) => {
                artifact.discard();
                return Err(failure.into());
            }
        };

        match output.code {
            Some(COMPARE_SIMILAR) => Ok(DiffOutcome::Identical(artifact)),
            Some(COMPARE_DISSIMILAR) => Ok(DiffOutcome::Different(artifact)),
            Some(COMPARE_FAILED) => {
                artifact.discard();
                log::warn!(
                    "compare failed for {} vs {}",
                    before.display(),
                    after.display()
                );
                Err(ToolFailure::ExitStatus {
                    program: command.program,
                    code: output.code,
                    detail: "compare failed, perhaps image dimensions differ".to_string(),
                }
                .into())
            }
            _ => {
                artifact.discard();
                log::warn!("compare exited unexpectedly with {:?}", output.code);
                Err(output.into_failure(&command.program).into())
            }
        }
    }

    /// Run `stage` on the diff image of a pair.
    ///
    /// If the diff image is deleted by an eviction after it is generated but
    /// before `stage` reads it, the diff is generated again and `stage` runs
    /// once more.
    ///
    /// # Errors
    ///
    /// Whatever [`generate_diff`](Self::generate_diff) or `stage` returns.
    pub fn with_diff<T>(
        &self,
        before: &Path,
        after: &Path,
        stage: impl Fn(&Path) -> DiffResult<T>,
    ) -> DiffResult<T> {
        let outcome = self.generate_diff(before, after)?;
        let diff = outcome.artifact().path();
        match stage(diff) {
            Err(e) if e.is_not_found() && !diff.exists() => {
                log::debug!("Diff image {} was evicted, regenerating", diff.display());
                let outcome = self.generate_diff(before, after)?;
                stage(outcome.artifact().path())
            }
            result => result,
        }
    }

    /// Dilate a diff image and paint its highlighted pixels red.
    ///
    /// # Errors
    ///
    /// - [`DiffError::ToolUnavailable`] if the toolkit is missing
    /// - [`DiffError::Io`] if `diff` does not exist or no artifact file can be
    ///   created
    /// - [`DiffError::ToolFailed`] on any non-zero `convert` exit or a timeout
    pub fn dilate(&self, diff: &Path) -> DiffResult<DiffArtifact> {
        self.toolkit.ensure_available()?;
        let key = absolute(diff)?;
        self.dilated
            .get_or_try_insert_with(&key, || self.run_dilate(&key))
    }

    fn run_dilate(&self, diff: &Path) -> DiffResult<DiffArtifact> {
        require_input(diff)?;
        let artifact = self.artifacts.allocate("png")?;
        let command = self.toolkit.dilate_command(diff, artifact.path());

        let result = match self.toolkit.run(&command) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => {
                log::warn!("convert exited with {:?} for {}", output.code, diff.display());
                Err(output.into_failure(&command.program))
            }
            Err(failure) => Err(failure),
        };

        match result {
            Ok(()) => Ok(artifact),
            Err(failure) => {
                artifact.discard();
                Err(failure.into())
            }
        }
    }

    /// Bounding box of the highlighted pixels in a diff image.
    ///
    /// # Errors
    ///
    /// - [`DiffError::ToolUnavailable`] if the toolkit is missing
    /// - [`DiffError::Io`] if `diff` does not exist
    /// - [`DiffError::ToolFailed`] on a non-zero `identify` exit, a timeout,
    ///   or output that is not a `WxH+L+T` geometry
    pub fn extract_bounding_box(&self, diff: &Path) -> DiffResult<BoundingBox> {
        self.toolkit.ensure_available()?;
        let key = absolute(diff)?;
        self.bounding_boxes
            .get_or_try_insert_with(&key, || self.run_geometry(&key))
    }

    fn run_geometry(&self, diff: &Path) -> DiffResult<BoundingBox> {
        require_input(diff)?;
        let command = self.toolkit.geometry_command(diff);
        let output = self.toolkit.run(&command)?;
        if !output.success() {
            return Err(output.into_failure(&command.program).into());
        }
        let bbox = parse_geometry(&command.program, &output.stdout).inspect_err(|_| {
            log::warn!("unexpected identify output for {}", diff.display());
        })?;
        Ok(bbox)
    }

    /// Cache counters for every stage.
    #[must_use]
    pub fn stats(&self) -> PerceptualStats {
        PerceptualStats {
            diffs: self.diffs.stats(),
            dilations: self.dilated.stats(),
            bounding_boxes: self.bounding_boxes.stats(),
        }
    }
}

/// A missing input is an I/O error, not a toolkit failure.
fn require_input(path: &Path) -> DiffResult<()> {
    fs::metadata(path)
        .map(|_| ())
        .map_err(|e| DiffError::io(path, e))
}
