use crate::collator::Collator;
use crate::sample::Sample;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tch::{Device, Tensor};

/// The `MiniBatch` struct represents a batch of crystals grouped for model input.
///
/// Crystals have different atom and bond counts, so a batch is a single
/// disjoint graph rather than a dense stack: node features are concatenated
/// along dim 0, edge indices are shifted into the combined node numbering,
/// and the `"batch"` tensor maps every node back to its crystal.
///
/// # Examples
/// Two crystals with 4 and 6 atoms give:
/// - `"frac_coords"` -> shape `[10, 3]`
/// - `"lengths"` -> shape `[2, 3]`
/// - `"num_atoms"` -> shape `[2]`
/// - `"batch"` -> `[0, 0, 0, 0, 1, 1, 1, 1, 1, 1]`
#[derive(Debug)]
pub struct MiniBatch {
    pub tensors: HashMap<String, Tensor>,
    pub(crate) num_graphs: usize,
}

impl MiniBatch {
    /// Constructs a `MiniBatch` by applying the given [`Collator`] to a
    /// list of individual [`Sample`]s.
    ///
    /// Example:
    /// let batch = MiniBatch::collate(samples, GraphCollator::crystal());
    pub fn collate(samples: Vec<Sample>, collator: impl Collator) -> Result<Self> {
        collator.collate(&samples)
    }

    /// Returns the number of crystals in the batch.
    pub fn num_graphs(&self) -> usize {
        self.num_graphs
    }

    /// Returns a reference to the tensor for a given feature key.
    pub fn get(&self, feature: &str) -> Result<&Tensor> {
        self.tensors
            .get(feature)
            .ok_or_else(|| anyhow!("Feature '{}' not found in mini-batch", feature))
    }

    /// Returns an iterator over all feature keys in the batch.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Transfers all tensors to the target device (CPU/GPU)
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            tensors: self
                .tensors
                .iter()
                .map(|(feature_name, tensor)| (feature_name.clone(), tensor.to_device(device)))
                .collect(),
            num_graphs: self.num_graphs,
        }
    }
}
