use crate::sample::Sample;
use anyhow::Result;

/// A per-crystal transform applied by [`CrystDataset`](crate::CrystDataset)
/// after a sample is built.
///
/// Transforms run inside loader workers. Any randomness must come from the
/// worker RNG (see [`crate::dataloader::with_worker_rng`]) so that a fixed
/// loader seed reproduces every epoch.
pub trait Transform: Send + Sync {
    fn apply(&self, sample: Sample) -> Result<Sample>;
}
