use crate::minibatch::MiniBatch;
use crate::sample::Sample;
use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use tch::Tensor;

/// A `Collator` defines how to combine multiple [`Sample`]s into a [`MiniBatch`].
pub trait Collator {
    fn collate(&self, samples: &[Sample]) -> Result<MiniBatch>;
}

/// Name of the node-to-graph assignment tensor added to every graph batch.
pub const BATCH_KEY: &str = "batch";

/// Defines how one feature is concatenated across the graphs of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatRule {
    /// Concatenate along this dimension as-is.
    Cat(i64),
    /// Add the running node offset of each graph, then concatenate along this
    /// dimension. Used for edge indices so they address the combined node list.
    IncrementByNodes(i64),
}

/// A `Collator` that merges variable-size graphs into one disjoint graph.
///
/// Every feature is concatenated according to its [`CatRule`]; features
/// without a registered rule are concatenated along dim 0, which covers
/// both node-level features (`[n, ...]`) and graph-level features that
/// carry a leading dimension of 1. The node count of each graph is read
/// from `num_nodes_key` and used both for index offsets and for the
/// `"batch"` vector.
///
/// # Example
/// ```ignore
/// let collator = GraphCollator::new("num_atoms")
///     .rule("edge_index", CatRule::IncrementByNodes(1))
///     .rule("to_jimages", CatRule::Cat(0));
/// ```
#[derive(Debug, Clone)]
pub struct GraphCollator {
    num_nodes_key: String,
    rules: HashMap<String, CatRule>,
}

impl GraphCollator {
    /// Creates a collator that reads per-graph node counts from `num_nodes_key`.
    pub fn new(num_nodes_key: impl Into<String>) -> Self {
        Self {
            num_nodes_key: num_nodes_key.into(),
            rules: HashMap::new(),
        }
    }

    /// Collator for the features produced by [`crate::dataset::CrystDataset`].
    pub fn crystal() -> Self {
        Self::new("num_atoms").rule("edge_index", CatRule::IncrementByNodes(1))
    }

    /// Registers (or replaces) the concatenation rule for a feature.
    pub fn rule(mut self, feature: impl Into<String>, rule: CatRule) -> Self {
        self.rules.insert(feature.into(), rule);
        self
    }

    fn rule_for(&self, feature: &str) -> &CatRule {
        self.rules.get(feature).unwrap_or(&CatRule::Cat(0))
    }

    fn node_counts(&self, samples: &[Sample]) -> Result<Vec<i64>> {
        samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let counts = sample.get(&self.num_nodes_key).with_context(|| {
                    format!("Sample #{} has no node count '{}'", i, self.num_nodes_key)
                })?;
                if counts.numel() != 1 {
                    bail!(
                        "Sample #{}: '{}' must hold a single value, got shape {:?}",
                        i,
                        self.num_nodes_key,
                        counts.size()
                    );
                }
                Ok(counts.int64_value(&[0]))
            })
            .collect()
    }
}

/// Checks that `tensors` agree on every dimension except `dim`.
fn validate_cat_shapes(feature: &str, tensors: &[Tensor], dim: i64) -> Result<()> {
    let reference = tensors[0].size();
    if dim < 0 || dim as usize >= reference.len() {
        bail!(
            "Invalid concatenation dimension {} for feature '{}' with shape {:?}",
            dim,
            feature,
            reference
        );
    }
    for (i, tensor) in tensors.iter().enumerate() {
        let shape = tensor.size();
        let compatible = shape.len() == reference.len()
            && shape
                .iter()
                .zip(reference.iter())
                .enumerate()
                .all(|(d, (a, b))| d as i64 == dim || a == b);
        if !compatible {
            bail!(
                "Shape mismatch in sample {} for feature '{}': expected {:?} (except dim {}), got {:?}",
                i,
                feature,
                reference,
                dim,
                shape
            );
        }
    }
    Ok(())
}

impl Collator for GraphCollator {
    fn collate(&self, samples: &[Sample]) -> Result<MiniBatch> {
        if samples.is_empty() {
            bail!("Cannot collate empty sample list");
        }

        // Validate feature keys
        let first_keys: HashSet<&String> = samples[0].features.keys().collect();
        for (i, sample) in samples.iter().enumerate().skip(1) {
            let missing_keys: Vec<&String> = first_keys
                .iter()
                .filter(|&&k| !sample.features.contains_key(k))
                .cloned()
                .collect();

            let extra_keys: Vec<&String> = sample
                .features
                .keys()
                .filter(|k| !first_keys.contains(k))
                .collect();

            if !missing_keys.is_empty() || !extra_keys.is_empty() {
                bail!(
                    "Sample #{} has mismatch feature keys:\n -Missing: {:?}\n -Extra: {:?}",
                    i,
                    missing_keys,
                    extra_keys
                )
            }
        }
        if first_keys.iter().any(|k| k.as_str() == BATCH_KEY) {
            bail!("Feature name '{}' is reserved for the node-to-graph index", BATCH_KEY);
        }

        let node_counts = self.node_counts(samples)?;
        let offsets: Vec<i64> = node_counts
            .iter()
            .scan(0i64, |acc, &n| {
                let offset = *acc;
                *acc += n;
                Some(offset)
            })
            .collect();

        let mut tensors = HashMap::with_capacity(first_keys.len() + 1);
        for key in first_keys {
            let (dim, parts): (i64, Vec<Tensor>) = match self.rule_for(key) {
                CatRule::Cat(dim) => (
                    *dim,
                    samples
                        .iter()
                        .map(|s| s.features[key.as_str()].shallow_clone())
                        .collect(),
                ),
                CatRule::IncrementByNodes(dim) => (
                    *dim,
                    samples
                        .iter()
                        .zip(offsets.iter())
                        .map(|(s, &offset)| &s.features[key.as_str()] + offset)
                        .collect(),
                ),
            };

            validate_cat_shapes(key, &parts, dim)?;
            tensors.insert(key.clone(), Tensor::cat(&parts, dim));
        }

        let assignment: Vec<i64> = node_counts
            .iter()
            .enumerate()
            .flat_map(|(graph, &n)| std::iter::repeat(graph as i64).take(n.max(0) as usize))
            .collect();
        tensors.insert(BATCH_KEY.to_string(), Tensor::from_slice(&assignment));

        Ok(MiniBatch {
            tensors,
            num_graphs: samples.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn make_graph(num_nodes: i64, edges: &[(i64, i64)]) -> Sample {
        let src: Vec<i64> = edges.iter().map(|e| e.0).collect();
        let dst: Vec<i64> = edges.iter().map(|e| e.1).collect();
        let edge_index = Tensor::stack(&[Tensor::from_slice(&src), Tensor::from_slice(&dst)], 0);
        Sample::from_single(
            "frac_coords",
            Tensor::zeros(&[num_nodes, 3], (Kind::Float, Device::Cpu)),
        )
        .with_feature("edge_index", edge_index)
        .with_feature("lengths", Tensor::ones(&[1, 3], (Kind::Float, Device::Cpu)))
        .with_feature("num_atoms", Tensor::from_slice(&[num_nodes]))
    }

    #[test]
    fn test_edge_indices_are_offset_by_preceding_nodes() -> Result<()> {
        let batch = GraphCollator::crystal().collate(&[
            make_graph(2, &[(0, 1), (1, 0)]),
            make_graph(3, &[(0, 2)]),
        ])?;

        let edge_index = batch.get("edge_index")?;
        assert_eq!(edge_index.size(), &[2, 3]);
        let src: Vec<i64> = edge_index.get(0).try_into()?;
        let dst: Vec<i64> = edge_index.get(1).try_into()?;
        assert_eq!(src, vec![0, 1, 2]);
        assert_eq!(dst, vec![1, 0, 4]);
        Ok(())
    }

    #[test]
    fn test_batch_vector_assigns_nodes_to_graphs() -> Result<()> {
        let batch = GraphCollator::crystal().collate(&[
            make_graph(2, &[]),
            make_graph(1, &[]),
            make_graph(3, &[]),
        ])?;

        let assignment: Vec<i64> = batch.get(BATCH_KEY)?.try_into()?;
        assert_eq!(assignment, vec![0, 0, 1, 2, 2, 2]);
        assert_eq!(batch.get("frac_coords")?.size(), &[6, 3]);
        assert_eq!(batch.get("lengths")?.size(), &[3, 3]);
        assert_eq!(batch.get("edge_index")?.size(), &[2, 0]);
        Ok(())
    }

    #[test]
    fn test_incompatible_trailing_shape_is_rejected() {
        let a = make_graph(2, &[]);
        let b = make_graph(2, &[])
            .with_feature("lengths", Tensor::ones(&[1, 4], (Kind::Float, Device::Cpu)));
        let result = GraphCollator::crystal().collate(&[a, b]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_node_count_is_rejected() {
        let sample = Sample::from_single("x", Tensor::ones(&[2, 1], (Kind::Float, Device::Cpu)));
        let result = GraphCollator::crystal().collate(&[sample]);
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_rule_overrides_default() -> Result<()> {
        let collator = GraphCollator::new("n").rule("pairs", CatRule::Cat(1));
        let s1 = Sample::from_single("pairs", Tensor::zeros(&[2, 1], (Kind::Float, Device::Cpu)))
            .with_feature("n", Tensor::from_slice(&[1i64]));
        let s2 = Sample::from_single("pairs", Tensor::zeros(&[2, 3], (Kind::Float, Device::Cpu)))
            .with_feature("n", Tensor::from_slice(&[1i64]));
        let batch = collator.collate(&[s1, s2])?;
        assert_eq!(batch.get("pairs")?.size(), &[2, 4]);
        Ok(())
    }
}
