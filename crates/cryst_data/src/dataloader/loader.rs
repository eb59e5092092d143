//! src/dataloader/loader.rs
//!
//! DataLoader constructors.
//!
//! # Automatic Sampling
//! DataLoader creates the appropriate sampler based on `config.shuffle`:
//! - If `config.shuffle = false`, DataLoader creates a SequentialSampler.
//! - If `config.shuffle = true`, DataLoader creates a RandomSampler with `config.seed`.
//!
//! **Methods:**
//! - `new()` - Auto-sampling + default GraphCollator
//! - `new_with_collator()` - Auto-sampling + custom Collator
//!
//! # Custom sampling
//! - `new_with_sampler_and_collator()` - User provided index sampler + custom Collator
//!
//! The sampler is wrapped with a `BatchSampler` using the configured
//! batch_size and drop_last.
//!
//! # Seed Coordination
//!
//! The sampler's seed controls sampling order, while config.seed controls worker
//! initialization and transform randomness. When both are given they must match:
//!
//! ```ignore
//! let seed = 42;
//! let sampler = RandomSampler::new(dataset.len(), seed);
//! let config = DataLoaderConfig::builder()
//!     .batch_size(32)
//!     .seed(seed)
//!     .build();
//! let dataloader = DataLoader::new_with_sampler_and_collator(dataset, sampler, config, collator)?;
//! ```

use crate::collator::{Collator, GraphCollator};
use crate::dataset::Dataset;
use crate::sampler::{BatchSampler, RandomSampler, Sampler, SequentialSampler};
use anyhow::{bail, ensure, Context, Result};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::config::DataLoaderConfig;
use super::iterator::DataLoaderIter;

type IndexSampler = Box<dyn Sampler<Item = usize>>;

/// The main DataLoader struct that coordinates data loading
///
/// # Thread safety:
/// - `DataLoader` itself is Send + Sync and can be shared across threads.
/// - Multiple iterators can be created from the same DataLoader; each one
///   advances the epoch counter.
///
/// # Type parameters:
/// - `D`: Dataset type
/// - `C`: Collator type (defaults to GraphCollator)
pub struct DataLoader<D: ?Sized, C = GraphCollator> {
    pub(crate) dataset: Arc<D>,
    pub(crate) collator: C,
    pub(crate) config: DataLoaderConfig,
    pub(crate) batch_sampler: BatchSampler<IndexSampler>,
    pub(crate) current_epoch: AtomicUsize,
    pub(crate) runtime_seed: u64,
}

impl<D> DataLoader<D, GraphCollator>
where
    D: Dataset + ?Sized + 'static,
{
    /// Creates a DataLoader that batches crystals with [`GraphCollator::crystal`].
    ///
    /// # Example
    /// ```ignore
    /// let config = DataLoaderConfig::builder()
    ///     .batch_size(32)
    ///     .shuffle(true)
    ///     .seed(42)
    ///     .build();
    /// let dataloader = DataLoader::new(Arc::new(dataset), config)?;
    /// ```
    pub fn new(dataset: Arc<D>, config: DataLoaderConfig) -> Result<Self> {
        Self::new_with_collator(dataset, config, GraphCollator::crystal())
    }
}

impl<D, C> DataLoader<D, C>
where
    D: Dataset + ?Sized + 'static,
    C: Collator + Clone + Send + Sync + 'static,
{
    /// Creates a new DataLoader with automatic sampling and a custom collator.
    ///
    /// # Errors
    /// - Returns error if `batch_size` is 0
    /// - Returns error if `prefetch_factor` is 0 when using workers
    pub fn new_with_collator(dataset: Arc<D>, config: DataLoaderConfig, collator: C) -> Result<Self> {
        let effective_seed = config.seed.unwrap_or_else(|| rand::rng().random());

        let sampler: IndexSampler = if config.shuffle {
            Box::new(RandomSampler::new(dataset.len(), effective_seed))
        } else {
            Box::new(SequentialSampler::new(dataset.len()))
        };

        Self::build(dataset, sampler, config, collator, effective_seed)
    }

    /// Creates a DataLoader with a user-provided index sampler.
    ///
    /// # Errors
    /// - Returns error if `config.shuffle = true`
    /// - Returns error if `config.seed` and sampler's seed do not match.
    pub fn new_with_sampler_and_collator(
        dataset: Arc<D>,
        sampler: impl Sampler<Item = usize> + 'static,
        config: DataLoaderConfig,
        collator: C,
    ) -> Result<Self> {
        if config.shuffle {
            bail!(
                "Cannot specify shuffle = true when providing a custom sampler.\n\
                Either:\n\
                1. Use DataLoader::new() with shuffle=true to let DataLoader manage sampling\n\
                2. Use DataLoader::new_with_sampler_and_collator() with shuffle=false and your own sampler"
            );
        }

        let runtime_seed = match (sampler.seed(), config.seed) {
            (Some(sampler_seed), Some(config_seed)) => {
                ensure!(
                    sampler_seed == config_seed,
                    "Seed mismatch: sampler uses seed {} but dataloader's config.seed is {}. \
                    For proper coordination, use the same seed value.",
                    sampler_seed,
                    config_seed
                );
                sampler_seed
            }
            (Some(sampler_seed), None) => sampler_seed,
            (None, Some(config_seed)) => config_seed,
            (None, None) => rand::rng().random(),
        };

        Self::build(dataset, Box::new(sampler), config, collator, runtime_seed)
    }

    fn build(
        dataset: Arc<D>,
        sampler: IndexSampler,
        config: DataLoaderConfig,
        collator: C,
        runtime_seed: u64,
    ) -> Result<Self> {
        ensure!(config.batch_size > 0, "Batch size must be greater than 0");
        ensure!(
            config.prefetch_factor > 0 || config.num_workers == 0,
            "Prefetch factor must be > 0 when using {} workers",
            config.num_workers
        );

        let batch_sampler = BatchSampler::new(sampler, config.batch_size, config.drop_last)
            .context("Failed to wrap sampler with BatchSampler")?;

        debug!(
            samples = dataset.len(),
            batch_size = config.batch_size,
            num_workers = config.num_workers,
            shuffle = config.shuffle,
            seed = runtime_seed,
            "Created DataLoader"
        );

        Ok(Self {
            dataset,
            collator,
            config,
            batch_sampler,
            current_epoch: AtomicUsize::new(0),
            runtime_seed,
        })
    }

    /// Starts a new epoch and returns an iterator over its batches.
    ///
    /// Every call advances the epoch counter, so consecutive iterators of a
    /// shuffling loader see different orders.
    pub fn iter(&self) -> Result<DataLoaderIter<'_, D, C>> {
        let epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed);
        DataLoaderIter::new(self, epoch)
    }

    /// Sets the epoch the next [`DataLoader::iter`] call starts.
    pub fn set_epoch(&self, epoch: usize) {
        self.current_epoch.store(epoch, Ordering::Relaxed);
    }
}

impl<D, C> DataLoader<D, C>
where
    D: Dataset + ?Sized,
{
    /// Epoch the next iterator will serve.
    pub fn epoch(&self) -> usize {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        let samples = self.dataset.len();
        let batch_size = self.config.batch_size;
        if self.config.drop_last {
            samples / batch_size
        } else {
            samples.div_ceil(batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dataset(&self) -> &Arc<D> {
        &self.dataset
    }

    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    /// Base seed shared by the sampler and the worker RNGs.
    pub fn seed(&self) -> u64 {
        self.runtime_seed
    }
}
