pub mod collator;
pub mod config;
pub mod dataloader;
pub mod datamodule;
pub mod dataset;
pub mod instantiate;
pub mod minibatch;
pub mod readers;
pub mod record;
pub mod sample;
pub mod sampler;
pub mod scaler;
pub mod transforms;

pub use collator::{CatRule, Collator, GraphCollator};
pub use config::{DataModuleConfig, DatasetsConfig, SplitValues};
pub use dataloader::{DataLoader, DataLoaderConfig};
pub use datamodule::{CrystDataModule, Stage};
pub use dataset::{CrystDataset, CrystDatasetParams, Dataset};
pub use instantiate::{Registry, TargetConfig};
pub use minibatch::MiniBatch;
pub use record::{CrystRecord, LatticeScaleMethod};
pub use sample::Sample;
pub use scaler::{get_scaler_from_data_list, StandardScaler};
