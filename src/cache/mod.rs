//! In-process memoization for the diff pipeline.
//!
//! Every expensive pipeline stage (content hashing, diff generation, dilation,
//! bounding box extraction, JSON normalization) is wrapped in its own
//! [`MemoCache`], keyed on the stage's exact arguments.
//!
//! # Guarantees
//!
//! * On the success path the wrapped computation runs at most once per key for
//!   the lifetime of the cache.
//! * Concurrent callers asking for a key that is being computed block on that
//!   key and receive the same value; they never launch a second computation.
//! * Failures are not stored. The next call with the same key recomputes.
//!
//! # Staleness
//!
//! Entries are never revalidated against the filesystem. A file rewritten in
//! place after it was cached keeps its old result until it is evicted or the
//! owning cache is dropped. This matches how a diff viewer is used: the
//! compared revisions are fixed for one session.
//!
//! # Eviction
//!
//! Caches created with a capacity drop their least recently used entry once
//! the capacity is exceeded. A hit counts as a use; [`MemoCache::peek`] does
//! not. An eviction hook lets the owner release resources tied
//! to the evicted value, such as deleting a temporary diff image.

pub mod entry;
pub mod memo;

pub use entry::CacheStats;
pub use memo::{EvictHook, MemoCache};
