//! Configuration tree of the crystal data module.
//!
//! Example:
//! ```yaml
//! datasets:
//!   train:
//!     _target_: cryst_data.CrystDataset
//!     name: Formation energy train
//!     path: data/mp_20/train.jsonl
//!     prop: [formation_energy_per_atom]
//!     lattice_scale_method: scale_length
//!   val:
//!     - _target_: cryst_data.CrystDataset
//!       name: Formation energy val
//!       path: data/mp_20/val.jsonl
//!       prop: [formation_energy_per_atom]
//!   test:
//!     - _target_: cryst_data.CrystDataset
//!       name: Formation energy test
//!       path: data/mp_20/test.jsonl
//!       prop: [formation_energy_per_atom]
//! num_workers: {train: 4, val: 2, test: 2}
//! batch_size: {train: 256, val: 256, test: 256}
//! scaler_path: null
//! seed: 42
//! ```

use crate::instantiate::TargetConfig;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One value per split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitValues<T> {
    pub train: T,
    pub val: T,
    pub test: T,
}

impl<T: fmt::Display> fmt::Display for SplitValues<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{train: {}, val: {}, test: {}}}",
            self.train, self.val, self.test
        )
    }
}

/// Dataset nodes for every split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetsConfig {
    pub train: TargetConfig,
    #[serde(default)]
    pub val: Vec<TargetConfig>,
    #[serde(default)]
    pub test: Vec<TargetConfig>,
}

impl fmt::Display for DatasetsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |configs: &[TargetConfig]| {
            configs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "{{train: {}, val: [{}], test: [{}]}}",
            self.train,
            join(&self.val),
            join(&self.test)
        )
    }
}

fn default_prefetch_factor() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    30
}

/// Root configuration of [`crate::datamodule::CrystDataModule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModuleConfig {
    pub datasets: DatasetsConfig,
    pub num_workers: SplitValues<usize>,
    pub batch_size: SplitValues<usize>,
    /// Directory with `lattice_scaler.pt` and `prop_scalers.pt`. When absent,
    /// scalers are fitted on the training split.
    #[serde(default)]
    pub scaler_path: Option<PathBuf>,
    /// Base seed for shuffling and worker RNGs; drawn at random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Batches in flight per worker.
    #[serde(default = "default_prefetch_factor")]
    pub prefetch_factor: usize,
    /// Seconds to wait for a batch from the workers before failing.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl DataModuleConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).context("Failed to parse data module configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize data module configuration")
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        for (split, size) in [
            ("train", self.batch_size.train),
            ("val", self.batch_size.val),
            ("test", self.batch_size.test),
        ] {
            ensure!(size > 0, "batch_size.{} must be greater than 0", split);
        }
        ensure!(
            self.prefetch_factor > 0,
            "prefetch_factor must be greater than 0"
        );
        ensure!(self.timeout_secs > 0, "timeout_secs must be greater than 0");

        let all = std::iter::once(&self.datasets.train)
            .chain(&self.datasets.val)
            .chain(&self.datasets.test);
        for node in all {
            ensure!(
                !node.target.trim().is_empty(),
                "Dataset node {:?} has an empty _target_",
                node.name()
            );
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
