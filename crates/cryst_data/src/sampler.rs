use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

/// A `Sampler` defines the order in which a dataset is visited.
///
/// # Associated type
/// - `Item`: The handle yielded by the iterator; `usize` indices for
///   per-sample samplers, `Vec<usize>` for batch samplers.
///
/// # Method
/// - `iter(epoch)`: returns a sequential or shuffled sequence for that epoch.
///    The epoch is combined with the base seed so shuffles differ between
///    epochs but repeat across runs.
/// - `seed()`: the base seed of random samplers, `None` for deterministic ones.
pub trait Sampler: Send + Sync {
    type Item: Send + Sync;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_>;

    fn seed(&self) -> Option<u64> {
        None
    }
}

/// ============================================================================
/// Yields indices sequentially in order `(0,1,2,...,dataset_size-1)`.
///
/// # Examples
/// ```ignore
/// let sampler = SequentialSampler::new(5);
/// let indices: Vec<_> = sampler.iter(0).collect();
/// assert_eq!(indices, vec![0, 1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    dataset_size: usize,
}

impl SequentialSampler {
    pub fn new(dataset_size: usize) -> Self {
        Self { dataset_size }
    }
}

impl Sampler for SequentialSampler {
    type Item = usize;

    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(0..self.dataset_size)
    }
}

/// ============================================================================
/// Random permutation of `0..dataset_size`, reshuffled every epoch.
///
/// # Seed Handling
/// For each epoch the RNG is seeded with `base_seed + epoch`, so epoch 0 uses
/// `base_seed` and epoch 1 uses `base_seed + 1`. Every epoch sees a fresh
/// order, and the same base seed reproduces the whole sequence of orders.
///
/// # Example usage
/// ```ignore
/// let sampler = RandomSampler::new(1000, 42);
/// let epoch0: Vec<_> = sampler.iter(0).collect();
/// ```
#[derive(Debug, Clone)]
pub struct RandomSampler {
    dataset_size: usize,
    base_seed: u64,
}

impl RandomSampler {
    pub fn new(dataset_size: usize, base_seed: u64) -> Self {
        Self {
            dataset_size,
            base_seed,
        }
    }

    /// Derives a deterministic random number generator for the given epoch
    #[inline]
    fn derive_rng_for_epoch(&self, epoch: usize) -> StdRng {
        StdRng::seed_from_u64(self.base_seed.wrapping_add(epoch as u64))
    }
}

impl Sampler for RandomSampler {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = self.derive_rng_for_epoch(epoch);
        let mut indices: Vec<_> = (0..self.dataset_size).collect();
        indices.shuffle(&mut rng);
        Box::new(indices.into_iter())
    }

    fn seed(&self) -> Option<u64> {
        Some(self.base_seed)
    }
}

/// ============================================================================
/// Groups the indices of an inner sampler into mini-batches.
///
/// The last batch may be smaller than `batch_size` unless `drop_last` is set.
///
/// # Example
/// ```ignore
/// let batch_sampler = BatchSampler::new(SequentialSampler::new(10), 4, false)?;
/// // [0, 1, 2, 3], [4, 5, 6, 7], [8, 9]
/// ```
#[derive(Debug, Clone)]
pub struct BatchSampler<S> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> BatchSampler<S> {
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Result<Self> {
        ensure!(
            batch_size > 0,
            "batch_size must be > 0, but got batch_size={}",
            batch_size
        );
        Ok(Self {
            sampler,
            batch_size,
            drop_last,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn drop_last(&self) -> bool {
        self.drop_last
    }
}

impl<S: Sampler> Sampler for BatchSampler<S> {
    type Item = Vec<S::Item>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_> {
        let mut sampler_iter = self.sampler.iter(epoch);
        let batch_size = self.batch_size;
        let drop_last = self.drop_last;

        Box::new(std::iter::from_fn(move || {
            let mut mini_batch = Vec::with_capacity(batch_size);
            for _ in 0..batch_size {
                if let Some(item) = sampler_iter.next() {
                    mini_batch.push(item);
                } else {
                    break;
                }
            }
            if mini_batch.len() == batch_size || (!drop_last && !mini_batch.is_empty()) {
                Some(mini_batch)
            } else {
                None
            }
        }))
    }

    fn seed(&self) -> Option<u64> {
        self.sampler.seed()
    }
}

impl<S: Sampler + ?Sized> Sampler for Box<S> {
    type Item = S::Item;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_> {
        (**self).iter(epoch)
    }

    fn seed(&self) -> Option<u64> {
        (**self).seed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_sampler() {
        let sampler = SequentialSampler::new(4);
        assert_eq!(sampler.iter(0).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(sampler.iter(5).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(sampler.seed().is_none());
    }

    #[test]
    fn test_random_sampler_is_a_permutation() {
        let sampler = RandomSampler::new(50, 1);
        let mut order: Vec<_> = sampler.iter(0).collect();
        order.sort_unstable();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_random_sampler_reproducible_per_epoch() {
        let a = RandomSampler::new(100, 42);
        let b = RandomSampler::new(100, 42);
        assert_eq!(a.iter(0).collect::<Vec<_>>(), b.iter(0).collect::<Vec<_>>());
        assert_ne!(a.iter(0).collect::<Vec<_>>(), a.iter(1).collect::<Vec<_>>());
        assert_eq!(a.seed(), Some(42));
    }

    #[test]
    fn test_batch_sampler_keeps_or_drops_last() -> Result<()> {
        let keep = BatchSampler::new(SequentialSampler::new(10), 4, false)?;
        let batches: Vec<_> = keep.iter(0).collect();
        assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);

        let drop = BatchSampler::new(SequentialSampler::new(10), 4, true)?;
        assert_eq!(drop.iter(0).count(), 2);
        Ok(())
    }

    #[test]
    fn test_batch_sampler_rejects_zero_batch_size() {
        assert!(BatchSampler::new(SequentialSampler::new(3), 0, false).is_err());
    }

    #[test]
    fn test_boxed_sampler_forwards_seed() -> Result<()> {
        let boxed: Box<dyn Sampler<Item = usize>> = Box::new(RandomSampler::new(8, 9));
        let batches = BatchSampler::new(boxed, 3, false)?;
        assert_eq!(batches.seed(), Some(9));
        assert_eq!(batches.iter(0).count(), 3);
        Ok(())
    }
}
