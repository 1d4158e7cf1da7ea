//! Content identity checks.
//!
//! [`ContentIdentity`] answers "are these two files byte-identical?" cheaply on
//! repeat calls:
//!
//! 1. Files with different sizes are different; nothing is hashed.
//! 2. Otherwise both files are hashed with BLAKE3 and the digests compared.
//!
//! Digests are memoized per absolute path. They are never revalidated, so a
//! file rewritten in place after being hashed keeps its old digest until the
//! `ContentIdentity` is dropped.

pub mod hasher;

use std::fs;
use std::path::{Path, PathBuf};

pub use hasher::{hash_to_hex, Hash, Hasher};

use crate::cache::{CacheStats, MemoCache};
use crate::error::{DiffError, DiffResult};

/// A file taking part in a comparison.
///
/// Only the cheap facts are held here. The digest is computed on demand by
/// [`ContentIdentity`] and lives in its cache, keyed by [`path`](Self::path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
}

impl FileHandle {
    /// Stat the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Io`] if the path cannot be made absolute or stat'ed.
    pub fn open(path: &Path) -> DiffResult<Self> {
        let path = absolute(path)?;
        let size = fs::metadata(&path)
            .map_err(|e| DiffError::io(&path, e))?
            .len();
        Ok(Self { path, size })
    }
}

pub(crate) fn absolute(path: &Path) -> DiffResult<PathBuf> {
    std::path::absolute(path).map_err(|e| DiffError::io(path, e))
}

/// Memoized content hashing and file equality.
#[derive(Debug)]
pub struct ContentIdentity {
    hasher: Hasher,
    hashes: MemoCache<PathBuf, Hash>,
}

impl ContentIdentity {
    /// Create a checker that remembers at most `capacity` digests.
    #[must_use]
    pub fn new(hasher: Hasher, capacity: usize) -> Self {
        Self {
            hasher,
            hashes: MemoCache::bounded("content_hash", capacity),
        }
    }

    /// BLAKE3 digest of the file at `path`, read at most once per path.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Io`] if the file cannot be read. Errors are not cached.
    pub fn content_hash(&self, path: &Path) -> DiffResult<Hash> {
        let key = absolute(path)?;
        self.hashes
            .get_or_try_insert_with(&key, || self.hasher.full_hash(&key))
    }

    /// Whether the two files have identical content.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Io`] if either file cannot be stat'ed or read.
    /// A missing file is never reported as "different".
    pub fn are_identical(&self, a: &Path, b: &Path) -> DiffResult<bool> {
        let a = FileHandle::open(a)?;
        let b = FileHandle::open(b)?;
        self.are_handles_identical(&a, &b)
    }

    /// Same as [`are_identical`](Self::are_identical) for already stat'ed files.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Io`] if either file cannot be read.
    pub fn are_handles_identical(&self, a: &FileHandle, b: &FileHandle) -> DiffResult<bool> {
        if a.size != b.size {
            log::trace!(
                "size mismatch {} ({}) vs {} ({})",
                a.path.display(),
                a.size,
                b.path.display(),
                b.size
            );
            return Ok(false);
        }
        Ok(self.content_hash(&a.path)? == self.content_hash(&b.path)?)
    }

    /// Counters for the digest cache. `misses` counts actual file reads.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.hashes.stats()
    }
}
