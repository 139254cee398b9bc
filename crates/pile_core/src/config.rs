//! Pile configuration.

use crate::error::{PileError, PileResult};
use crate::types::AllocationMode;
use std::path::PathBuf;
use std::time::Duration;

/// Number of free-chunk buckets per segment.
pub const FREE_BUCKET_COUNT: usize = 16;

/// Smallest allowed segment size (64 MiB).
pub const MIN_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Largest allowed segment size (2 GiB).
pub const MAX_SEGMENT_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// Default segment size (256 MiB).
pub const DEFAULT_SEGMENT_SIZE: usize = 256 * 1024 * 1024;

/// Smallest allowed free-chunk threshold.
pub const MIN_FREE_CHUNK_SIZE: usize = 64;

/// Default free-chunk thresholds, 64 B through 64 KiB.
pub const DEFAULT_FREE_CHUNK_SIZES: [usize; FREE_BUCKET_COUNT] = [
    64, 128, 256, 384, 512, 768, 1024, 1536, 2048, 3072, 4096, 6144, 8192, 16384, 32768, 65536,
];

/// Smallest allowed per-bucket capacity.
pub const MIN_FREE_LIST_SIZE: usize = 25_600;

/// Largest allowed per-bucket capacity.
pub const MAX_FREE_LIST_SIZE: usize = 128 * 1024;

/// Default per-bucket capacity.
pub const DEFAULT_FREE_LIST_SIZE: usize = 100_000;

/// Configuration for opening a pile.
#[derive(Debug, Clone)]
pub struct PileConfig {
    /// Size of every newly created segment in bytes.
    pub segment_size: usize,

    /// Ascending chunk-size thresholds of the 16 free buckets.
    pub free_chunk_sizes: [usize; FREE_BUCKET_COUNT],

    /// Maximum number of addresses tracked per free bucket.
    pub free_list_size: usize,

    /// Maximum number of live segments (0 = unlimited).
    pub max_segment_count: usize,

    /// Maximum bytes of segment memory (0 = unlimited).
    pub max_memory: u64,

    /// Segment selection and retirement policy.
    pub allocation_mode: AllocationMode,

    /// Minimum time between opportunistic crawls of one segment.
    pub crawl_interval: Duration,

    /// Directory for memory-mapped segment files (None = process memory).
    pub data_dir: Option<PathBuf>,

    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether mounted segments are crawled before `open` returns.
    pub crawl_on_open: bool,
}

impl Default for PileConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            free_chunk_sizes: DEFAULT_FREE_CHUNK_SIZES,
            free_list_size: DEFAULT_FREE_LIST_SIZE,
            max_segment_count: 0,
            max_memory: 0,
            allocation_mode: AllocationMode::FavorSpeed,
            crawl_interval: Duration::from_secs(5),
            data_dir: None,
            create_if_missing: true,
            crawl_on_open: true,
        }
    }
}

impl PileConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment size.
    #[must_use]
    pub const fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the free-chunk thresholds.
    #[must_use]
    pub const fn free_chunk_sizes(mut self, sizes: [usize; FREE_BUCKET_COUNT]) -> Self {
        self.free_chunk_sizes = sizes;
        self
    }

    /// Sets the per-bucket capacity.
    #[must_use]
    pub const fn free_list_size(mut self, size: usize) -> Self {
        self.free_list_size = size;
        self
    }

    /// Sets the maximum number of live segments.
    #[must_use]
    pub const fn max_segment_count(mut self, count: usize) -> Self {
        self.max_segment_count = count;
        self
    }

    /// Sets the maximum segment memory in bytes.
    #[must_use]
    pub const fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Sets the allocation mode.
    #[must_use]
    pub const fn allocation_mode(mut self, mode: AllocationMode) -> Self {
        self.allocation_mode = mode;
        self
    }

    /// Sets the opportunistic crawl interval.
    #[must_use]
    pub const fn crawl_interval(mut self, interval: Duration) -> Self {
        self.crawl_interval = interval;
        self
    }

    /// Stores segments as memory-mapped files under `dir`.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets whether to create a missing data directory.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether mounted segments are crawled during `open`.
    #[must_use]
    pub const fn crawl_on_open(mut self, value: bool) -> Self {
        self.crawl_on_open = value;
        self
    }

    /// Checks every bound.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first violated bound.
    pub fn validate(&self) -> PileResult<()> {
        if !(MIN_SEGMENT_SIZE..=MAX_SEGMENT_SIZE).contains(&self.segment_size) {
            return Err(PileError::invalid_config(format!(
                "segment size {} outside {}..={}",
                self.segment_size, MIN_SEGMENT_SIZE, MAX_SEGMENT_SIZE
            )));
        }
        if self.segment_size % 8 != 0 {
            return Err(PileError::invalid_config(format!(
                "segment size {} is not a multiple of 8",
                self.segment_size
            )));
        }
        if self.free_chunk_sizes[0] < MIN_FREE_CHUNK_SIZE {
            return Err(PileError::invalid_config(format!(
                "smallest free chunk size {} is below {}",
                self.free_chunk_sizes[0], MIN_FREE_CHUNK_SIZE
            )));
        }
        if self.free_chunk_sizes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PileError::invalid_config(
                "free chunk sizes must be strictly increasing",
            ));
        }
        if self.free_chunk_sizes[FREE_BUCKET_COUNT - 1] >= self.segment_size {
            return Err(PileError::invalid_config(
                "largest free chunk size must be below the segment size",
            ));
        }
        if !(MIN_FREE_LIST_SIZE..=MAX_FREE_LIST_SIZE).contains(&self.free_list_size) {
            return Err(PileError::invalid_config(format!(
                "free list size {} outside {}..={}",
                self.free_list_size, MIN_FREE_LIST_SIZE, MAX_FREE_LIST_SIZE
            )));
        }
        if self.max_memory != 0 && self.max_memory < self.segment_size as u64 {
            return Err(PileError::invalid_config(
                "max memory is smaller than one segment",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = PileConfig::default();
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);
        assert_eq!(config.allocation_mode, AllocationMode::FavorSpeed);
        assert!(config.data_dir.is_none());
        assert!(config.crawl_on_open);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = PileConfig::new()
            .segment_size(MIN_SEGMENT_SIZE)
            .allocation_mode(AllocationMode::ReuseSpace)
            .max_segment_count(4)
            .data_dir("/tmp/pile");

        assert_eq!(config.segment_size, MIN_SEGMENT_SIZE);
        assert_eq!(config.allocation_mode, AllocationMode::ReuseSpace);
        assert_eq!(config.max_segment_count, 4);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/pile")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn segment_size_bounds() {
        assert!(PileConfig::new().segment_size(MIN_SEGMENT_SIZE - 8).validate().is_err());
        assert!(PileConfig::new().segment_size(MAX_SEGMENT_SIZE + 8).validate().is_err());
        assert!(PileConfig::new().segment_size(MAX_SEGMENT_SIZE).validate().is_ok());
        assert!(PileConfig::new().segment_size(MIN_SEGMENT_SIZE + 4).validate().is_err());
    }

    #[test]
    fn free_chunk_sizes_must_increase() {
        let mut sizes = DEFAULT_FREE_CHUNK_SIZES;
        sizes[5] = sizes[4];
        let result = PileConfig::new().free_chunk_sizes(sizes).validate();
        assert!(matches!(result, Err(PileError::InvalidConfig { .. })));
    }

    #[test]
    fn free_chunk_sizes_minimum() {
        let mut sizes = DEFAULT_FREE_CHUNK_SIZES;
        sizes[0] = 32;
        assert!(PileConfig::new().free_chunk_sizes(sizes).validate().is_err());
    }

    #[test]
    fn free_list_size_bounds() {
        assert!(PileConfig::new().free_list_size(1000).validate().is_err());
        assert!(PileConfig::new().free_list_size(MAX_FREE_LIST_SIZE + 1).validate().is_err());
        assert!(PileConfig::new().free_list_size(MIN_FREE_LIST_SIZE).validate().is_ok());
    }

    #[test]
    fn max_memory_must_hold_a_segment() {
        let config = PileConfig::new().max_memory(1024);
        assert!(config.validate().is_err());
    }
}
