use crate::instantiate::{Registry, TargetConfig};
use crate::readers::JsonlSource;
use crate::record::{CrystRecord, LatticeScaleMethod, SCALED_LATTICE_KEY};
use crate::sample::Sample;
use crate::scaler::StandardScaler;
use crate::transforms::{RandomTranslate, Transform};
use anyhow::{anyhow, bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tch::{Kind, Tensor};
use tracing::info;

/// A `Dataset` provides random access to model-ready samples.
///
/// Implementations must be `Send + Sync` so loader workers can share one
/// instance through an `Arc`.
pub trait Dataset: Send + Sync {
    /// Returns total number of samples.
    fn len(&self) -> usize;

    /// Checks if the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the sample at `index`.
    fn get_sample(&self, index: usize) -> Result<Sample>;
}

/// Target names under which [`CrystDataset`] is registered.
pub const CRYST_DATASET_TARGETS: [&str; 2] = ["CrystDataset", "cryst_data.CrystDataset"];

/// Accepts either a single property name or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum PropNames {
    One(String),
    Many(Vec<String>),
}

fn deserialize_props<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match PropNames::deserialize(deserializer)? {
        PropNames::One(name) => vec![name],
        PropNames::Many(names) => names,
    })
}

/// Keyword parameters of the `CrystDataset` target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrystDatasetParams {
    pub name: String,
    /// JSONL file of preprocessed [`CrystRecord`]s.
    pub path: PathBuf,
    /// Target properties, in the order they appear in `y`.
    #[serde(default, deserialize_with = "deserialize_props")]
    pub prop: Vec<String>,
    #[serde(default)]
    pub lattice_scale_method: LatticeScaleMethod,
    /// Apply [`RandomTranslate`] to every sample.
    #[serde(default)]
    pub random_translate: bool,
}

/// An in-memory dataset of preprocessed crystals.
///
/// Records are stored behind an `Arc`, so cloning the dataset (as loaders
/// do when handing it to workers) never copies the data. Scalers are
/// attached after construction and shared by reference with every other
/// split of the same data module.
#[derive(Clone)]
pub struct CrystDataset {
    name: String,
    prop: Vec<String>,
    lattice_scale_method: LatticeScaleMethod,
    records: Arc<[CrystRecord]>,
    lattice_scaler: Option<Arc<StandardScaler>>,
    prop_scalers: Option<Arc<Vec<StandardScaler>>>,
    transform: Option<Arc<dyn Transform>>,
}

impl fmt::Debug for CrystDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrystDataset")
            .field("name", &self.name)
            .field("len", &self.records.len())
            .field("prop", &self.prop)
            .field("lattice_scale_method", &self.lattice_scale_method)
            .field("has_scalers", &self.has_scalers())
            .finish()
    }
}

impl CrystDataset {
    /// Builds a dataset from already-loaded records.
    ///
    /// Every record is validated and gets its scaled lattice computed.
    pub fn from_records(
        name: impl Into<String>,
        prop: Vec<String>,
        records: Vec<CrystRecord>,
        lattice_scale_method: LatticeScaleMethod,
    ) -> Result<Self> {
        let name = name.into();
        let records = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                record
                    .validate()
                    .with_context(|| format!("Invalid crystal #{} in dataset '{}'", i, name))?;
                Ok(record.with_scaled_lattice(lattice_scale_method))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            prop,
            lattice_scale_method,
            records: records.into(),
            lattice_scaler: None,
            prop_scalers: None,
            transform: None,
        })
    }

    /// Loads the JSONL file named by `params`.
    pub fn from_params(params: CrystDatasetParams) -> Result<Self> {
        let records: Vec<CrystRecord> = JsonlSource::new(&params.path)
            .read_all()
            .with_context(|| format!("Failed to load dataset '{}'", params.name))?;
        info!(
            "Loaded {} crystals for '{}' from {}",
            records.len(),
            params.name,
            params.path.display()
        );

        let dataset = Self::from_records(
            params.name,
            params.prop,
            records,
            params.lattice_scale_method,
        )?;
        Ok(if params.random_translate {
            dataset.with_transform(RandomTranslate)
        } else {
            dataset
        })
    }

    /// A registry that knows how to build this dataset from a config node.
    pub fn registry() -> Registry<CrystDataset> {
        let mut registry = Registry::new();
        for target in CRYST_DATASET_TARGETS {
            registry.register(target, |config: &TargetConfig| {
                CrystDataset::from_params(config.params()?)
            });
        }
        registry
    }

    /// Applies `transform` to every sample after it is built.
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the target properties.
    pub fn props(&self) -> &[String] {
        &self.prop
    }

    pub fn lattice_scale_method(&self) -> LatticeScaleMethod {
        self.lattice_scale_method
    }

    /// The preprocessed records, as used to fit scalers.
    pub fn cached_data(&self) -> &[CrystRecord] {
        &self.records
    }

    /// Attaches the shared scalers used to normalize targets.
    pub fn set_scalers(
        &mut self,
        lattice_scaler: Arc<StandardScaler>,
        prop_scalers: Arc<Vec<StandardScaler>>,
    ) {
        self.lattice_scaler = Some(lattice_scaler);
        self.prop_scalers = Some(prop_scalers);
    }

    /// Checks the attached scalers against the first record: one property
    /// scaler per `prop` entry, each as wide as the property it scales.
    pub fn check_scalers(&self) -> Result<()> {
        let (Some(lattice_scaler), Some(scalers)) = (&self.lattice_scaler, &self.prop_scalers)
        else {
            bail!("Dataset '{}' has no scalers attached", self.name);
        };
        ensure!(
            scalers.len() == self.prop.len(),
            "Dataset '{}' has {} properties but {} property scalers",
            self.name,
            self.prop.len(),
            scalers.len()
        );
        let Some(first) = self.records.first() else {
            return Ok(());
        };

        let lattice_width = first.feature(SCALED_LATTICE_KEY)?.len() as i64;
        ensure!(
            lattice_width == lattice_scaler.width(),
            "Lattice scaler was fitted on {} columns, dataset '{}' has {}",
            lattice_scaler.width(),
            self.name,
            lattice_width
        );
        for (name, scaler) in self.prop.iter().zip(scalers.iter()) {
            let width = first
                .property(name)
                .with_context(|| format!("Dataset '{}' cannot provide '{}'", self.name, name))?
                .len() as i64;
            ensure!(
                width == scaler.width(),
                "Property '{}' of dataset '{}' has {} values but its scaler was fitted on {}",
                name,
                self.name,
                width,
                scaler.width()
            );
        }
        Ok(())
    }

    pub fn has_scalers(&self) -> bool {
        self.lattice_scaler.is_some() && self.prop_scalers.is_some()
    }

    pub fn lattice_scaler(&self) -> Option<&Arc<StandardScaler>> {
        self.lattice_scaler.as_ref()
    }

    pub fn prop_scalers(&self) -> Option<&Arc<Vec<StandardScaler>>> {
        self.prop_scalers.as_ref()
    }

    /// Scaled targets of one record, shape `[1, P]`.
    fn scaled_targets(&self, record: &CrystRecord) -> Result<Tensor> {
        let scalers = self.prop_scalers.as_ref().ok_or_else(|| {
            anyhow!(
                "Dataset '{}' has no property scalers attached; run setup first",
                self.name
            )
        })?;
        ensure!(
            scalers.len() == self.prop.len(),
            "Dataset '{}' has {} properties but {} property scalers",
            self.name,
            self.prop.len(),
            scalers.len()
        );

        let parts = self
            .prop
            .iter()
            .zip(scalers.iter())
            .map(|(name, scaler)| {
                let values = record.property(name)?;
                ensure!(
                    values.len() as i64 == scaler.width(),
                    "Property '{}' of dataset '{}' has {} values but its scaler was fitted on {}",
                    name,
                    self.name,
                    values.len(),
                    scaler.width()
                );
                scaler.transform(&Tensor::from_slice(&values))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::cat(&parts, 0).view([1, -1]))
    }

    fn build_sample(&self, record: &CrystRecord) -> Result<Sample> {
        let num_atoms = record.num_atoms() as i64;
        let num_bonds = record.num_bonds() as i64;

        let coords: Vec<f64> = record.frac_coords.iter().flatten().copied().collect();
        let frac_coords = Tensor::from_slice(&coords)
            .to_kind(Kind::Float)
            .view([num_atoms, 3]);

        let edge_index = match &record.edge_index {
            Some([src, dst]) => Tensor::stack(&[Tensor::from_slice(src), Tensor::from_slice(dst)], 0),
            None => Tensor::zeros([2, 0], (Kind::Int64, tch::Device::Cpu)),
        };
        let to_jimages = match &record.to_jimages {
            Some(images) => {
                let flat: Vec<i64> = images.iter().flatten().copied().collect();
                Tensor::from_slice(&flat).view([num_bonds, 3])
            }
            None => Tensor::zeros([num_bonds, 3], (Kind::Int64, tch::Device::Cpu)),
        };

        let mut sample = Sample::from_single("frac_coords", frac_coords)
            .with_feature("atom_types", Tensor::from_slice(&record.atom_types))
            .with_feature(
                "lengths",
                Tensor::from_slice(&record.lengths).to_kind(Kind::Float).view([1, 3]),
            )
            .with_feature(
                "angles",
                Tensor::from_slice(&record.angles).to_kind(Kind::Float).view([1, 3]),
            )
            .with_feature("edge_index", edge_index)
            .with_feature("to_jimages", to_jimages)
            .with_feature("num_atoms", Tensor::from_slice(&[num_atoms]))
            .with_feature("num_bonds", Tensor::from_slice(&[num_bonds]));

        if !self.prop.is_empty() {
            sample = sample.with_feature("y", self.scaled_targets(record)?);
        }
        Ok(sample)
    }
}

impl Dataset for CrystDataset {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn get_sample(&self, index: usize) -> Result<Sample> {
        let record = self.records.get(index).ok_or_else(|| {
            anyhow!(
                "Index {} out of bounds for dataset '{}' of size {}",
                index,
                self.name,
                self.records.len()
            )
        })?;
        let sample = self
            .build_sample(record)
            .with_context(|| format!("Failed to build crystal #{} of '{}'", index, self.name))?;
        match &self.transform {
            Some(transform) => transform.apply(sample),
            None => Ok(sample),
        }
    }
}
