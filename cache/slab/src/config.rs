//! Configuration types for the slab engine.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Default page size (1MB). Also the size of the largest slab class.
pub const DEFAULT_PAGE_SIZE: usize = 1024 * 1024;

/// Default memory limit (64MB).
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Default chunk size growth factor between adjacent classes.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.25;

/// Default hash index power (2^16 = 64K buckets).
pub const DEFAULT_HASHPOWER: u8 = 16;

/// Smallest accepted hash index power.
pub const MIN_HASHPOWER: u8 = 4;

/// Largest hash index power. The index never grows beyond this.
pub const MAX_HASHPOWER: u8 = 32;

/// Chunk sizes are rounded up to a multiple of this.
pub const CHUNK_ALIGN_BYTES: usize = 8;

/// Upper bound on the number of slab classes.
pub const MAX_SLAB_CLASSES: usize = 200;

/// Bytes reserved at the start of every chunk for the item header.
pub const HEADER_SIZE: usize = 48;

/// Default smallest chunk: a header plus 48 bytes of key/suffix/value.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = HEADER_SIZE + 48;

/// Longest accepted key.
pub const MAX_KEY_LEN: usize = 250;

/// Minimum age before a read moves an item back to the LRU head.
pub const DEFAULT_ITEM_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Number of LRU tail items inspected when looking for a chunk to reclaim.
pub const EVICTION_SEARCH_DEPTH: usize = 5;

/// Where slab pages come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// Each page is a separate allocation from the global allocator.
    #[default]
    Heap,
    /// One region of `memory_limit` bytes is reserved up front and pages
    /// are carved from it.
    Arena,
}

/// Slab engine configuration.
///
/// Every field has a default so a partial TOML table deserializes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlabCacheConfig {
    /// Memory budget for slab pages in bytes. 0 means unlimited.
    #[serde(deserialize_with = "deserialize_size")]
    pub memory_limit: usize,
    /// Page size in bytes. Pages are split into chunks of one class.
    #[serde(deserialize_with = "deserialize_size")]
    pub page_size: usize,
    /// Chunk size multiplier between adjacent classes.
    pub growth_factor: f64,
    /// Chunk size of the smallest class.
    #[serde(deserialize_with = "deserialize_size")]
    pub min_chunk_size: usize,
    /// Reserve one page for every class at construction.
    pub preallocate: bool,
    /// Page memory source.
    pub memory_source: MemorySource,
    /// Initial hash index power (2^power buckets).
    pub hashpower: u8,
    /// Minimum age before a read refreshes an item's LRU position.
    #[serde(deserialize_with = "deserialize_duration")]
    pub item_update_interval: Duration,
}

impl Default for SlabCacheConfig {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            preallocate: false,
            memory_source: MemorySource::Heap,
            hashpower: DEFAULT_HASHPOWER,
            item_update_interval: DEFAULT_ITEM_UPDATE_INTERVAL,
        }
    }
}

impl SlabCacheConfig {
    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> CacheResult<()> {
        if !(self.growth_factor > 1.0) || !self.growth_factor.is_finite() {
            return Err(CacheError::InvalidConfig(format!(
                "growth_factor must be greater than 1.0 (got {})",
                self.growth_factor
            )));
        }
        if self.min_chunk_size <= HEADER_SIZE {
            return Err(CacheError::InvalidConfig(format!(
                "min_chunk_size must be larger than the {HEADER_SIZE} byte item header (got {})",
                self.min_chunk_size
            )));
        }
        if self.page_size < self.min_chunk_size {
            return Err(CacheError::InvalidConfig(format!(
                "page_size ({}) is smaller than min_chunk_size ({})",
                self.page_size, self.min_chunk_size
            )));
        }
        if self.page_size > u32::MAX as usize {
            return Err(CacheError::InvalidConfig(format!(
                "page_size ({}) is too large",
                self.page_size
            )));
        }
        if !(MIN_HASHPOWER..=MAX_HASHPOWER).contains(&self.hashpower) {
            return Err(CacheError::InvalidConfig(format!(
                "hashpower must be between {MIN_HASHPOWER} and {MAX_HASHPOWER} (got {})",
                self.hashpower
            )));
        }
        if self.memory_limit != 0 && self.memory_limit < self.page_size {
            return Err(CacheError::InvalidConfig(format!(
                "memory_limit ({}) is smaller than one page ({})",
                self.memory_limit, self.page_size
            )));
        }
        if self.memory_source == MemorySource::Arena && self.memory_limit == 0 {
            return Err(CacheError::InvalidConfig(
                "arena memory source requires a memory_limit".to_string(),
            ));
        }
        Ok(())
    }
}

/// One size class: chunk size and chunks per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassInfo {
    /// Class id (index into the class table).
    pub class_id: u8,
    /// Chunk size in bytes, header included.
    pub chunk_size: usize,
    /// Chunks carved out of each page.
    pub per_page: usize,
}

/// The table of size classes derived from a configuration.
///
/// Chunk sizes start at `min_chunk_size`, are aligned to
/// [`CHUNK_ALIGN_BYTES`], and grow by `growth_factor` until they exceed
/// `page_size / growth_factor`. The last class is always exactly one page
/// holding a single chunk.
#[derive(Debug, Clone)]
pub struct SlabClasses {
    classes: Vec<ClassInfo>,
}

impl SlabClasses {
    /// Compute the class table. The configuration is assumed valid.
    pub fn new(config: &SlabCacheConfig) -> Self {
        let page_size = config.page_size;
        let factor = config.growth_factor;
        let limit = page_size as f64 / factor;

        let mut classes = Vec::new();
        let mut size = config.min_chunk_size;

        while classes.len() < MAX_SLAB_CLASSES - 1 && size as f64 <= limit {
            size = align(size);
            if size >= page_size {
                break;
            }
            classes.push(ClassInfo {
                class_id: classes.len() as u8,
                chunk_size: size,
                per_page: page_size / size,
            });
            // a factor close to 1.0 may not move the size; always advance
            size = ((size as f64 * factor) as usize).max(size + CHUNK_ALIGN_BYTES);
        }

        classes.push(ClassInfo {
            class_id: classes.len() as u8,
            chunk_size: page_size,
            per_page: 1,
        });

        Self { classes }
    }

    /// Find the smallest class whose chunk can hold `size` bytes.
    ///
    /// Returns `None` if the size exceeds the largest class.
    #[inline]
    pub fn select_class(&self, size: usize) -> Option<u8> {
        let idx = self.classes.partition_point(|c| c.chunk_size < size);
        if idx < self.classes.len() {
            Some(idx as u8)
        } else {
            None
        }
    }

    /// Get a class by id.
    #[inline]
    pub fn get(&self, class_id: u8) -> Option<&ClassInfo> {
        self.classes.get(class_id as usize)
    }

    /// Number of classes.
    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Always false; there is at least the page-sized class.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterate over the classes in increasing chunk size.
    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }

    /// Chunk size of the largest class.
    pub fn max_chunk_size(&self) -> usize {
        self.classes.last().map(|c| c.chunk_size).unwrap_or(0)
    }
}

#[inline]
fn align(size: usize) -> usize {
    let rem = size % CHUNK_ALIGN_BYTES;
    if rem == 0 {
        size
    } else {
        size + CHUNK_ALIGN_BYTES - rem
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Human(String),
}

/// Deserialize a size from either an integer or a string like "64MB".
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match SizeValue::deserialize(deserializer)? {
        SizeValue::Bytes(n) => usize::try_from(n).map_err(serde::de::Error::custom),
        SizeValue::Human(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a duration from a human-readable string (e.g., "60s", "5m").
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Parse a size string like "1GB", "512MB", "4KB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());

    let (num_str, suffix) = s.split_at(num_end);
    let num: f64 = num_str
        .parse()
        .map_err(|e| format!("invalid number '{}': {}", num_str, e))?;

    let multiplier: usize = match suffix.trim().to_uppercase().as_str() {
        "" | "B" => 1,
        "KB" | "K" | "KIB" => 1024,
        "MB" | "M" | "MIB" => 1024 * 1024,
        "GB" | "G" | "GIB" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size suffix '{}'", other)),
    };

    Ok((num * multiplier as f64) as usize)
}
