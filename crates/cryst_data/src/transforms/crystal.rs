use super::core::Transform;
use crate::dataloader::worker_gen_range;
use crate::sample::Sample;
use anyhow::{ensure, Result};
use tch::Tensor;

/// Shifts every fractional coordinate of a crystal by one random vector.
///
/// Coordinates are wrapped back into `[0, 1)`, so the result describes the
/// same periodic structure with a different origin. The shift is drawn from
/// the worker RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTranslate;

impl Transform for RandomTranslate {
    fn apply(&self, mut sample: Sample) -> Result<Sample> {
        let shifted = {
            let coords = sample.get("frac_coords")?;
            ensure!(
                coords.dim() == 2 && coords.size()[1] == 3,
                "frac_coords must have shape [n, 3], got {:?}",
                coords.size()
            );
            let shift: Vec<f64> = (0..3).map(|_| worker_gen_range(0.0..1.0)).collect();
            let shift = Tensor::from_slice(&shift).to_kind(coords.kind()).view([1, 3]);
            (coords + &shift).remainder(1.0)
        };
        sample.features.insert("frac_coords".to_string(), shifted);
        Ok(sample)
    }
}
