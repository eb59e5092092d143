//! src/dataloader/config.rs
//!
//! Configuration for DataLoader behaviour
//!
//! Example:
//! ```ignore
//! let config = DataLoaderConfig::builder()
//!     .batch_size(256)
//!     .num_workers(4)
//!     .shuffle(true)
//!     .seed(42)
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `num_workers`: More workers can improve throughput but increase memory usage
//! - `prefetch_factor`: Higher values keep the consumer fed but hold more batches in memory

use std::time::Duration;

/// Configuration for DataLoader
#[derive(Debug, Clone, PartialEq)]
pub struct DataLoaderConfig {
    /// Number of crystals per batch
    pub batch_size: usize,
    /// Number of parallel workers (0 = load on the calling thread)
    pub num_workers: usize,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Whether to reshuffle the data every epoch
    pub shuffle: bool,
    /// Base seed for shuffling and worker RNGs; random when `None`
    pub seed: Option<u64>,
    /// Number of batches in flight per worker (must be > 0 when using workers)
    pub prefetch_factor: usize,
    /// Maximum time to wait for the next batch from workers.
    pub timeout: Duration,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            num_workers: 0,
            drop_last: false,
            shuffle: false,
            seed: None,
            prefetch_factor: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DataLoaderConfig {
    pub fn builder() -> DataLoaderConfigBuilder {
        DataLoaderConfigBuilder::default()
    }
}

/// Builder for DataLoaderConfig with method chaining
#[derive(Debug, Default)]
pub struct DataLoaderConfigBuilder {
    config: DataLoaderConfig,
}

impl DataLoaderConfigBuilder {
    /// Set the batch size (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the number of workers
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    /// Set whether to drop_last
    pub fn drop_last(mut self, drop: bool) -> Self {
        self.config.drop_last = drop;
        self
    }

    /// Set whether to shuffle dataset every epoch
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    /// Set the random seed for reproducible data loading.
    ///
    /// When set, this seed controls:
    /// - Data shuffling (if shuffle = true)
    /// - Worker RNGs used by random transforms
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Set or clear the seed.
    pub fn maybe_seed(mut self, seed: Option<u64>) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set the prefetch factor.
    pub fn prefetch_factor(mut self, factor: usize) -> Self {
        self.config.prefetch_factor = factor;
        self
    }

    /// Set the timeout for batch operations.
    ///
    /// - Too low: May fail batches during legitimate heavy processing
    /// - Too high: Delays detection of stuck workers.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> DataLoaderConfig {
        self.config
    }
}
