//! BLAKE3 file hasher with streaming and memory-mapped modes.
//!
//! # Overview
//! [`Hasher`] computes the BLAKE3 digest of a whole file. Small files are
//! streamed through a fixed buffer; files at or above the mmap threshold are
//! memory-mapped when mmap is enabled, falling back to streaming if the
//! mapping fails.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::{DiffError, DiffResult};

/// A BLAKE3 digest.
pub type Hash = [u8; 32];

/// Default read buffer size for streaming hashes.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default size at which files are memory-mapped (64 MiB).
pub const DEFAULT_MMAP_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Render a digest as lowercase hex.
#[must_use]
pub fn hash_to_hex(hash: &Hash) -> String {
    blake3::Hash::from(*hash).to_hex().to_string()
}

/// Whole-file BLAKE3 hasher.
#[derive(Debug, Clone)]
pub struct Hasher {
    buffer_size: usize,
    use_mmap: bool,
    mmap_threshold: u64,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher with mmap enabled at the default threshold.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            use_mmap: true,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
        }
    }

    /// Enable or disable memory-mapped hashing.
    #[must_use]
    pub fn with_mmap(mut self, enabled: bool) -> Self {
        self.use_mmap = enabled;
        self
    }

    /// Set the file size at which mmap is used.
    #[must_use]
    pub fn with_mmap_threshold(mut self, threshold: u64) -> Self {
        self.mmap_threshold = threshold;
        self
    }

    /// Set the streaming buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Hash the entire content of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Io`] if the file cannot be opened or read.
    pub fn full_hash(&self, path: &Path) -> DiffResult<Hash> {
        let file = File::open(path).map_err(|e| DiffError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| DiffError::io(path, e))?
            .len();

        if self.use_mmap && len > 0 && len >= self.mmap_threshold {
            match self.mmap_hash(&file) {
                Ok(hash) => return Ok(hash),
                Err(e) => {
                    log::debug!(
                        "mmap failed for {}, falling back to streaming: {}",
                        path.display(),
                        e
                    );
                }
            }
        }

        self.stream_hash(file).map_err(|e| DiffError::io(path, e))
    }

    fn mmap_hash(&self, file: &File) -> io::Result<Hash> {
        // SAFETY: the mapping is read-only and dropped before returning. A
        // concurrent writer can change the bytes we hash, which yields a
        // digest of mixed content but no memory unsafety for `&[u8]` reads.
        let mmap = unsafe { memmap2::Mmap::map(file)? };
        let mut hasher = blake3::Hasher::new();
        hasher.update(&mmap);
        Ok(*hasher.finalize().as_bytes())
    }

    fn stream_hash(&self, mut file: File) -> io::Result<Hash> {
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.buffer_size];
        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..n]);
        }
        Ok(*hasher.finalize().as_bytes())
    }
}
