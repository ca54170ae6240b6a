//! Error types for the slab engine.

use thiserror::Error;

/// Errors returned by slab engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// No free chunk could be produced for the size class, even after
    /// trying to reclaim or evict from the class LRU.
    #[error("out of memory")]
    OutOfMemory,

    /// The item is larger than the largest slab class.
    #[error("object too large for cache")]
    TooLarge,

    /// The key is not present (or has expired).
    #[error("not found")]
    NotFound,

    /// The key is empty or longer than the maximum key length.
    #[error("invalid key")]
    InvalidKey,

    /// Two items passed to a replace do not share a key.
    #[error("key mismatch")]
    KeyMismatch,

    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A page could not be reserved while preallocating a slab class.
    #[error("unable to preallocate page for slab class {class_id}")]
    Preallocation {
        /// Class that could not be populated.
        class_id: u8,
    },
}

/// Result type for slab engine operations.
pub type CacheResult<T> = Result<T, CacheError>;
