use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tch::Tensor;

/// The `Sample` struct represents a single crystal as the model sees it.
///
/// It maps feature names (e.g., `"frac_coords"`, `"atom_types"`, `"y"`)
/// to their tensors. Node-level features have one row per atom,
/// edge-level features one entry per bond, and graph-level features a
/// leading dimension of 1.
///
/// # Examples
/// A 4-atom crystal with 12 bonds and two target properties:
/// `{"frac_coords": [4, 3], "atom_types": [4], "lengths": [1, 3],
///   "angles": [1, 3], "edge_index": [2, 12], "to_jimages": [12, 3],
///   "num_atoms": [1], "num_bonds": [1], "y": [1, 2]}`
#[derive(Debug)]
pub struct Sample {
    pub features: HashMap<String, Tensor>,
}

/// Creates a shallow clone of the `Sample`
impl Clone for Sample {
    fn clone(&self) -> Self {
        let features = self
            .features
            .iter()
            .map(|(k, v)| (k.clone(), v.shallow_clone()))
            .collect();
        Self { features }
    }
}

/// Safety:
/// `tch::Tensor` is `Send` and `Sync`, and `HashMap<String, Tensor>` only
/// composes those types. Mutation requires `&mut self`, so shared references
/// only ever read.
unsafe impl Send for Sample {}
unsafe impl Sync for Sample {}

impl Sample {
    /// Creates a new `Sample` from a full feature map.
    pub fn new(features: HashMap<String, Tensor>) -> Self {
        Self { features }
    }

    /// Creates a `Sample` from a single `(feature_name, tensor)` pair.
    ///
    /// Chain with [`with_feature`](Self::with_feature) to add more features.
    pub fn from_single(name: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            features: HashMap::from([(name.into(), tensor)]),
        }
    }

    /// Adds or overwrites a feature in the `Sample`.
    pub fn with_feature(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.features.insert(name.into(), tensor);
        self
    }

    /// Returns a reference to the tensor by feature name.
    pub fn get(&self, feature: &str) -> Result<&Tensor> {
        self.features
            .get(feature)
            .ok_or_else(|| anyhow!("Feature {} not found", feature))
    }

    /// Returns an iterator over all feature names in this `Sample`.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod sample_test {
    use super::*;
    use anyhow::Result;
    use tch::{Device, Kind, Tensor};

    fn make_crystal(num_atoms: i64) -> Sample {
        Sample::from_single(
            "frac_coords",
            Tensor::zeros(&[num_atoms, 3], (Kind::Float, Device::Cpu)),
        )
        .with_feature(
            "atom_types",
            Tensor::from_slice(&vec![6i64; num_atoms as usize]),
        )
        .with_feature("num_atoms", Tensor::from_slice(&[num_atoms]))
    }

    #[test]
    fn test_sample_basic_construction() -> Result<()> {
        let sample = make_crystal(4);

        assert_eq!(sample.get("frac_coords")?.size(), &[4, 3]);
        assert_eq!(sample.get("num_atoms")?.int64_value(&[0]), 4);
        assert!(sample.get("missing").is_err());

        let features: Vec<_> = sample.features().collect();
        assert!(features.contains(&"frac_coords"));
        assert!(features.contains(&"atom_types"));
        assert!(features.contains(&"num_atoms"));
        Ok(())
    }

    #[test]
    fn test_sample_clone_shares_storage() -> Result<()> {
        let sample = make_crystal(2);
        let cloned = sample.clone();
        let _ = cloned.get("frac_coords")?.shallow_clone().fill_(1.0);
        assert_eq!(sample.get("frac_coords")?.double_value(&[0, 0]), 1.0);
        Ok(())
    }
}
