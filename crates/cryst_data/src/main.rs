//! `cryst-data`: fit normalization scalers and inspect crystal data modules.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cryst_data::dataloader::DataLoader;
use cryst_data::{CrystDataModule, CrystDataset, DataModuleConfig, Dataset, Stage};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Crystal data module tools", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit scalers on the training split and save them
    FitScalers {
        /// Data module YAML config
        #[arg(short, long)]
        config: PathBuf,
        /// Directory that receives lattice_scaler.pt and prop_scalers.pt
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Set up the data module and report dataset sizes and batch counts
    Inspect {
        #[arg(short, long)]
        config: PathBuf,
        /// Stage to set up (fit, validate, test, predict); all splits when omitted
        #[arg(short, long)]
        stage: Option<Stage>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Args::parse().command {
        Command::FitScalers { config, out } => {
            // Scalers are always refitted, even if the config points at saved ones.
            let mut config = DataModuleConfig::from_yaml_file(&config)?;
            config.scaler_path = None;
            let datamodule = CrystDataModule::new(config, CrystDataset::registry())?;
            datamodule.save_scalers(&out)?;
        }
        Command::Inspect { config, stage } => {
            let config = DataModuleConfig::from_yaml_file(&config)?;
            let mut datamodule = CrystDataModule::new(config, CrystDataset::registry())?;
            datamodule.prepare_data()?;
            datamodule.setup(stage)?;
            println!("{}", datamodule);

            if let Some(train) = datamodule.train_dataset().filter(|d| d.has_scalers()) {
                report("train", train.name(), &datamodule.train_dataloader()?);
            }
            if datamodule.val_datasets().is_some() {
                for loader in datamodule.val_dataloaders()? {
                    report("val", loader.dataset().name(), &loader);
                }
            }
            if datamodule.test_datasets().is_some() {
                for loader in datamodule.test_dataloaders()? {
                    report("test", loader.dataset().name(), &loader);
                }
            }
            info!(seed = datamodule.seed(), "Inspection finished");
        }
    }
    Ok(())
}

fn report(split: &str, name: &str, loader: &DataLoader<CrystDataset>) {
    println!(
        "{:<5} {:<40} {:>8} crystals {:>6} batches (batch_size={}, num_workers={})",
        split,
        name,
        loader.dataset().len(),
        loader.len(),
        loader.config().batch_size,
        loader.config().num_workers
    );
}
