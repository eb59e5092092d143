//! Orchestration of the crystal datasets of one training run.
//!
//! [`CrystDataModule`] builds datasets from the configuration tree, prepares
//! the normalization scalers (fitted on the training split, or loaded from
//! `scaler_path`), attaches them to every split, and hands out per-split
//! [`DataLoader`]s.
//!
//! ```ignore
//! let config = DataModuleConfig::from_yaml_file("conf/data/mp_20.yaml")?;
//! let mut datamodule = CrystDataModule::new(config, CrystDataset::registry())?;
//! datamodule.setup(Some(Stage::Fit))?;
//! for batch in datamodule.train_dataloader()?.iter()? {
//!     let batch = batch?;
//! }
//! ```

use crate::config::DataModuleConfig;
use crate::dataloader::{DataLoader, DataLoaderConfig};
use crate::dataset::{CrystDataset, Dataset};
use crate::instantiate::{Registry, TargetConfig};
use crate::record::SCALED_LATTICE_KEY;
use crate::scaler::{
    get_scaler_from_data_list, StandardScaler, LATTICE_SCALER_FILE, PROP_SCALERS_FILE,
};
use anyhow::{anyhow, bail, Context, Result};
use rand::Rng;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Phase of a run that [`CrystDataModule::setup`] prepares datasets for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fit,
    Validate,
    Test,
    Predict,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fit => "fit",
            Stage::Validate => "validate",
            Stage::Test => "test",
            Stage::Predict => "predict",
        };
        f.write_str(name)
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fit" => Ok(Stage::Fit),
            "validate" => Ok(Stage::Validate),
            "test" => Ok(Stage::Test),
            "predict" => Ok(Stage::Predict),
            other => bail!(
                "Unknown stage '{}': expected fit, validate, test or predict",
                other
            ),
        }
    }
}

/// Datasets, scalers and loaders for the train/val/test splits.
pub struct CrystDataModule {
    config: DataModuleConfig,
    registry: Registry<CrystDataset>,
    seed: u64,
    lattice_scaler: Arc<StandardScaler>,
    scalers: Arc<Vec<StandardScaler>>,
    train_dataset: Option<CrystDataset>,
    val_datasets: Option<Vec<CrystDataset>>,
    test_datasets: Option<Vec<CrystDataset>>,
}

impl CrystDataModule {
    /// Creates the module and prepares its scalers.
    ///
    /// Without `scaler_path` the training dataset is built right away, the
    /// scalers are fitted on it, and it is reused by [`CrystDataModule::setup`].
    pub fn new(config: DataModuleConfig, registry: Registry<CrystDataset>) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());

        let (train_dataset, lattice_scaler, scalers) = match &config.scaler_path {
            Some(dir) => {
                let (lattice_scaler, scalers) = load_scalers(dir)?;
                (None, lattice_scaler, scalers)
            }
            None => {
                let train = registry
                    .instantiate(&config.datasets.train)
                    .context("Failed to build the training dataset for scaler fitting")?;
                let (lattice_scaler, scalers) = fit_scalers(&train)?;
                (Some(train), lattice_scaler, scalers)
            }
        };

        Ok(Self {
            config,
            registry,
            seed,
            lattice_scaler: Arc::new(lattice_scaler),
            scalers: Arc::new(scalers),
            train_dataset,
            val_datasets: None,
            test_datasets: None,
        })
    }

    /// Hook for one-off preparation such as downloads. Nothing to do for
    /// preprocessed JSONL datasets.
    pub fn prepare_data(&self) -> Result<()> {
        Ok(())
    }

    /// Builds the datasets `stage` needs and attaches the scalers to them.
    ///
    /// `None` prepares every split. `Fit` builds train and validation, `Test`
    /// builds the test datasets; `Validate` and `Predict` build nothing.
    pub fn setup(&mut self, stage: Option<Stage>) -> Result<()> {
        if matches!(stage, None | Some(Stage::Fit)) {
            let mut train = match self.train_dataset.take() {
                Some(train) => train,
                None => self.registry.instantiate(&self.config.datasets.train)?,
            };
            train.set_scalers(self.lattice_scaler.clone(), self.scalers.clone());
            train.check_scalers()?;
            self.train_dataset = Some(train);
            self.val_datasets = Some(self.build_split(&self.config.datasets.val)?);
        }
        if matches!(stage, None | Some(Stage::Test)) {
            self.test_datasets = Some(self.build_split(&self.config.datasets.test)?);
        }

        info!(
            stage = %stage.map_or_else(|| "all".to_string(), |s| s.to_string()),
            train = self.train_dataset.as_ref().map(|d| d.len()),
            val = self.val_datasets.as_ref().map(|d| d.len()),
            test = self.test_datasets.as_ref().map(|d| d.len()),
            "Data module set up"
        );
        Ok(())
    }

    fn build_split(&self, nodes: &[TargetConfig]) -> Result<Vec<CrystDataset>> {
        let mut datasets = self.registry.instantiate_all(nodes)?;
        for dataset in &mut datasets {
            dataset.set_scalers(self.lattice_scaler.clone(), self.scalers.clone());
            dataset.check_scalers()?;
        }
        Ok(datasets)
    }

    fn loader_config(&self, batch_size: usize, num_workers: usize, shuffle: bool) -> DataLoaderConfig {
        DataLoaderConfig::builder()
            .batch_size(batch_size)
            .num_workers(num_workers)
            .shuffle(shuffle)
            .seed(self.seed)
            .prefetch_factor(self.config.prefetch_factor)
            .timeout(self.config.timeout())
            .build()
    }

    /// Shuffling loader over the training split.
    pub fn train_dataloader(&self) -> Result<DataLoader<CrystDataset>> {
        let train = self
            .train_dataset
            .as_ref()
            .filter(|d| d.has_scalers())
            .ok_or_else(|| anyhow!("train_dataloader called before setup(Fit)"))?;
        let config = self.loader_config(
            self.config.batch_size.train,
            self.config.num_workers.train,
            true,
        );
        DataLoader::new(Arc::new(train.clone()), config)
    }

    /// One ordered loader per validation dataset.
    pub fn val_dataloaders(&self) -> Result<Vec<DataLoader<CrystDataset>>> {
        let datasets = self
            .val_datasets
            .as_ref()
            .ok_or_else(|| anyhow!("val_dataloaders called before setup(Fit)"))?;
        self.ordered_loaders(
            datasets,
            self.config.batch_size.val,
            self.config.num_workers.val,
        )
    }

    /// One ordered loader per test dataset.
    pub fn test_dataloaders(&self) -> Result<Vec<DataLoader<CrystDataset>>> {
        let datasets = self
            .test_datasets
            .as_ref()
            .ok_or_else(|| anyhow!("test_dataloaders called before setup(Test)"))?;
        self.ordered_loaders(
            datasets,
            self.config.batch_size.test,
            self.config.num_workers.test,
        )
    }

    fn ordered_loaders(
        &self,
        datasets: &[CrystDataset],
        batch_size: usize,
        num_workers: usize,
    ) -> Result<Vec<DataLoader<CrystDataset>>> {
        datasets
            .iter()
            .map(|dataset| {
                DataLoader::new(
                    Arc::new(dataset.clone()),
                    self.loader_config(batch_size, num_workers, false),
                )
            })
            .collect()
    }

    /// Writes `lattice_scaler.pt` and `prop_scalers.pt` into `dir`.
    pub fn save_scalers(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create scaler directory {}", dir.display()))?;
        self.lattice_scaler.save(dir.join(LATTICE_SCALER_FILE))?;
        StandardScaler::save_list(dir.join(PROP_SCALERS_FILE), &self.scalers)?;
        info!("Saved scalers to {}", dir.display());
        Ok(())
    }

    pub fn config(&self) -> &DataModuleConfig {
        &self.config
    }

    /// Base seed used by every loader of this module.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn lattice_scaler(&self) -> &Arc<StandardScaler> {
        &self.lattice_scaler
    }

    /// Property scalers, in `prop` order.
    pub fn scalers(&self) -> &Arc<Vec<StandardScaler>> {
        &self.scalers
    }

    pub fn train_dataset(&self) -> Option<&CrystDataset> {
        self.train_dataset.as_ref()
    }

    pub fn val_datasets(&self) -> Option<&[CrystDataset]> {
        self.val_datasets.as_deref()
    }

    pub fn test_datasets(&self) -> Option<&[CrystDataset]> {
        self.test_datasets.as_deref()
    }
}

impl fmt::Display for CrystDataModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CrystDataModule(datasets={}, num_workers={}, batch_size={})",
            self.config.datasets, self.config.num_workers, self.config.batch_size
        )
    }
}

fn fit_scalers(train: &CrystDataset) -> Result<(StandardScaler, Vec<StandardScaler>)> {
    let records = train.cached_data();
    let lattice_scaler = get_scaler_from_data_list(records, SCALED_LATTICE_KEY)
        .with_context(|| format!("Failed to fit lattice scaler on '{}'", train.name()))?;
    let scalers = train
        .props()
        .iter()
        .map(|prop| {
            get_scaler_from_data_list(records, prop)
                .with_context(|| format!("Failed to fit scaler for property '{}'", prop))
        })
        .collect::<Result<Vec<_>>>()?;
    info!(
        "Fitted lattice scaler and {} property scalers on {} crystals of '{}'",
        scalers.len(),
        records.len(),
        train.name()
    );
    Ok((lattice_scaler, scalers))
}

fn load_scalers(dir: &Path) -> Result<(StandardScaler, Vec<StandardScaler>)> {
    let lattice_path = dir.join(LATTICE_SCALER_FILE);
    let props_path = dir.join(PROP_SCALERS_FILE);
    let lattice_scaler = StandardScaler::load(&lattice_path)
        .with_context(|| format!("Failed to load lattice scaler {}", lattice_path.display()))?;
    let scalers = StandardScaler::load_list(&props_path)
        .with_context(|| format!("Failed to load property scalers {}", props_path.display()))?;
    debug!(
        "Loaded lattice scaler and {} property scalers from {}",
        scalers.len(),
        dir.display()
    );
    Ok((lattice_scaler, scalers))
}
