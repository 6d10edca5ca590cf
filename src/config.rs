/// Controls whether a read is allowed to touch the file system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadTier {
    /// Read from cache and disk as needed.
    #[default]
    ReadAll,
    /// Serve from already-open readers only; a cache miss returns
    /// `Error::Incomplete` instead of opening the file.
    BlockCacheOnly,
}

/// Per-read options threaded through the table cache.
#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// Verify checksums on blocks read from disk.
    pub verify_checksums: bool,
    /// Populate shared caches with blocks read by this operation.
    pub fill_cache: bool,
    /// Cache-only reads return `Error::Incomplete` on miss.
    pub read_tier: ReadTier,
    /// Ignore prefix bloom structures and seek in full key order.
    pub total_order_seek: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            fill_cache: true,
            read_tier: ReadTier::ReadAll,
            total_order_seek: false,
        }
    }
}

impl ReadOptions {
    /// Options for compaction-time scans: checksummed, cache-neutral,
    /// full-order reads.
    pub fn for_compaction() -> Self {
        Self {
            verify_checksums: true,
            fill_cache: false,
            read_tier: ReadTier::ReadAll,
            total_order_seek: true,
        }
    }

    pub fn read_tier(mut self, tier: ReadTier) -> Self {
        self.read_tier = tier;
        self
    }

    pub fn fill_cache(mut self, fill: bool) -> Self {
        self.fill_cache = fill;
        self
    }
}

/// Configuration for the shared table cache.
#[derive(Clone, Debug)]
pub struct TableCacheConfig {
    /// Maximum number of open table readers held by the cache.
    pub capacity: usize,
}

impl Default for TableCacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl TableCacheConfig {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}
