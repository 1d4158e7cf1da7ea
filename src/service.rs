//! The long-lived diff service.
//!
//! [`DiffService`] owns every cache and the toolkit handle. Build one per
//! process (or per test) and share it behind an `Arc`; all operations take
//! `&self` and are safe to call from many threads at once.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use webdiff::config::Config;
//! use webdiff::error::DiffError;
//! use webdiff::service::DiffService;
//!
//! let service = DiffService::new(Config::default());
//! let (a, b) = (Path::new("before/logo.png"), Path::new("after/logo.png"));
//!
//! if !service.are_identical(a, b)? {
//!     match service.pdiff_bbox(a, b) {
//!         Ok(bbox) => println!("changed region: {:?}", bbox),
//!         Err(DiffError::ToolUnavailable) => println!("perceptual diff unavailable"),
//!         Err(e) => return Err(e),
//!     }
//! }
//! # Ok::<(), DiffError>(())
//! ```

use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::CacheStats;
use crate::config::Config;
use crate::error::DiffResult;
use crate::identity::{ContentIdentity, Hash, Hasher};
use crate::magick::{BoundingBox, CommandRunner, SystemRunner, Toolkit};
use crate::metadata::{image_metadata, ImageMetadata};
use crate::normalize::JsonNormalizer;
use crate::pdiff::{ArtifactStore, DiffArtifact, DiffOutcome, PerceptualDiff, PerceptualStats};

/// Counters for every cache in the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Content digest cache
    pub content_hashes: CacheStats,
    /// Perceptual diff stage caches
    pub perceptual: PerceptualStats,
    /// JSON normalization cache
    pub normalized_json: CacheStats,
}

/// Memoized identity checks and perceptual diffs.
pub struct DiffService {
    config: Config,
    identity: ContentIdentity,
    perceptual: PerceptualDiff,
    normalizer: JsonNormalizer,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for DiffService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffService")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("perceptual", &self.perceptual)
            .field("pool", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .finish_non_exhaustive()
    }
}

impl DiffService {
    /// Create a service that runs the real ImageMagick binaries.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    /// Create a service that launches tools through `runner`.
    #[must_use]
    pub fn with_runner(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        let toolkit = Arc::new(Toolkit::new(
            runner,
            config.programs(),
            config.tool_timeout(),
        ));
        let artifacts = ArtifactStore::new(config.temp_dir.clone());
        let hasher = Hasher::new().with_mmap_threshold(config.mmap_threshold);

        // Fall back to rayon's global pool rather than failing construction.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.io_threads.max(1))
            .thread_name(|i| format!("webdiff-io-{i}"))
            .build()
            .inspect_err(|e| {
                log::warn!(
                    "Failed to create worker pool ({}), using global pool with {} threads",
                    e,
                    rayon::current_num_threads()
                );
            })
            .ok();

        Self {
            identity: ContentIdentity::new(hasher, config.cache_capacity),
            perceptual: PerceptualDiff::new(
                toolkit,
                artifacts.clone(),
                config.cache_capacity,
                config.delete_evicted_artifacts,
            ),
            normalizer: JsonNormalizer::new(
                artifacts,
                config.cache_capacity,
                config.delete_evicted_artifacts,
            ),
            pool,
            config,
        }
    }

    /// Configuration the service was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether ImageMagick is usable. Probed once, then cached.
    pub fn is_tool_available(&self) -> bool {
        self.perceptual.toolkit().is_available()
    }

    /// Forget the cached availability so the next operation probes again.
    pub fn reprobe(&self) {
        self.perceptual.toolkit().reprobe();
    }

    /// BLAKE3 digest of a file, read at most once per path.
    pub fn content_hash(&self, path: &Path) -> DiffResult<Hash> {
        self.identity.content_hash(path)
    }

    /// Whether two files have identical bytes.
    pub fn are_identical(&self, a: &Path, b: &Path) -> DiffResult<bool> {
        self.identity.are_identical(a, b)
    }

    /// Perceptual diff of two images.
    pub fn generate_diff(&self, before: &Path, after: &Path) -> DiffResult<DiffOutcome> {
        self.perceptual.generate_diff(before, after)
    }

    /// Dilated copy of a diff image.
    pub fn dilate(&self, diff: &Path) -> DiffResult<DiffArtifact> {
        self.perceptual.dilate(diff)
    }

    /// Bounding box of the highlighted pixels in a diff image.
    pub fn extract_bounding_box(&self, diff: &Path) -> DiffResult<BoundingBox> {
        self.perceptual.extract_bounding_box(diff)
    }

    /// Dilated diff image for an image pair, ready to overlay in the viewer.
    pub fn pdiff_image(&self, before: &Path, after: &Path) -> DiffResult<DiffArtifact> {
        self.perceptual
            .with_diff(before, after, |diff| self.perceptual.dilate(diff))
    }

    /// Bounding box of the changes between two images.
    pub fn pdiff_bbox(&self, before: &Path, after: &Path) -> DiffResult<BoundingBox> {
        self.perceptual
            .with_diff(before, after, |diff| self.perceptual.extract_bounding_box(diff))
    }

    /// File size and image dimensions. Not cached; a stat and a header read.
    pub fn image_metadata(&self, path: &Path) -> DiffResult<ImageMetadata> {
        image_metadata(path)
    }

    /// Path of a normalized copy of a JSON file, or the file itself if it is
    /// not valid JSON.
    pub fn normalize_json(&self, path: &Path) -> DiffResult<PathBuf> {
        self.normalizer.normalize(path)
    }

    /// Generate diffs for many pairs on the worker pool.
    ///
    /// Results are in input order. Pairs are independent; one failing does
    /// not stop the others.
    pub fn diff_many(&self, pairs: &[(PathBuf, PathBuf)]) -> Vec<DiffResult<DiffOutcome>> {
        self.on_pool(|| {
            pairs
                .par_iter()
                .map(|(before, after)| self.generate_diff(before, after))
                .collect()
        })
    }

    /// Hash many files on the worker pool. Results are in input order.
    pub fn hash_many(&self, paths: &[PathBuf]) -> Vec<DiffResult<Hash>> {
        self.on_pool(|| {
            paths
                .par_iter()
                .map(|path| self.content_hash(path))
                .collect()
        })
    }

    fn on_pool<R: Send>(&self, work: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }

    /// Counters for every cache.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            content_hashes: self.identity.stats(),
            perceptual: self.perceptual.stats(),
            normalized_json: self.normalizer.stats(),
        }
    }
}
