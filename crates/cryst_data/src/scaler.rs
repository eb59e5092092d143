//! Standard (z-score) scalers for lattice parameters and target properties.
//!
//! A fitted [`StandardScaler`] holds per-column means and standard
//! deviations. Scalers are persisted with tch's named-tensor serialization:
//! one file holds a single scaler (`means`, `stds`), the property-scaler
//! file holds a list keyed by position (`0.means`, `0.stds`, `1.means`, ...).

use crate::record::CrystRecord;
use anyhow::{bail, ensure, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tch::{Device, Kind, Tensor};

/// Added to every standard deviation so constant columns do not divide by zero.
pub const EPSILON: f64 = 1e-5;

/// File name of the persisted lattice scaler.
pub const LATTICE_SCALER_FILE: &str = "lattice_scaler.pt";
/// File name of the persisted property scaler list.
pub const PROP_SCALERS_FILE: &str = "prop_scalers.pt";

/// Per-column standardization: `(x - means) / stds`.
#[derive(Debug)]
pub struct StandardScaler {
    means: Tensor,
    stds: Tensor,
}

/// Safety: same reasoning as `Sample` — the scaler's tensors are only read
/// through shared references; mutation requires `&mut self`.
unsafe impl Sync for StandardScaler {}

/// Creates a shallow clone; both clones share the same statistics storage.
impl Clone for StandardScaler {
    fn clone(&self) -> Self {
        Self {
            means: self.means.shallow_clone(),
            stds: self.stds.shallow_clone(),
        }
    }
}

impl PartialEq for StandardScaler {
    fn eq(&self, other: &Self) -> bool {
        self.means.size() == other.means.size()
            && self.stds.size() == other.stds.size()
            && self.means.allclose(&other.means, 1e-6, 1e-8, false)
            && self.stds.allclose(&other.stds, 1e-6, 1e-8, false)
    }
}

impl StandardScaler {
    /// Creates a scaler from precomputed statistics.
    pub fn new(means: Tensor, stds: Tensor) -> Result<Self> {
        ensure!(
            means.size() == stds.size(),
            "Scaler means {:?} and stds {:?} must have the same shape",
            means.size(),
            stds.size()
        );
        Ok(Self {
            means: means.to_kind(Kind::Float),
            stds: stds.to_kind(Kind::Float),
        })
    }

    /// Fits column statistics over the rows of `x` (dim 0).
    ///
    /// Uses the biased standard deviation, then adds [`EPSILON`].
    pub fn fit(x: &Tensor) -> Result<Self> {
        ensure!(
            x.dim() >= 1 && x.size()[0] > 0,
            "Cannot fit a scaler on an empty tensor of shape {:?}",
            x.size()
        );
        let x = x.to_kind(Kind::Float);
        let means = x.mean_dim([0i64].as_slice(), false, Kind::Float);
        let stds = x.std_dim([0i64].as_slice(), false, false) + EPSILON;
        Ok(Self { means, stds })
    }

    pub fn means(&self) -> &Tensor {
        &self.means
    }

    pub fn stds(&self) -> &Tensor {
        &self.stds
    }

    /// Number of columns the scaler was fitted on.
    pub fn width(&self) -> i64 {
        self.means.numel() as i64
    }

    /// Standardizes `x`, whose last dimension must match [`width`](Self::width).
    pub fn transform(&self, x: &Tensor) -> Result<Tensor> {
        self.check_width(x)?;
        let x = x.to_kind(Kind::Float);
        Ok(x.f_sub(&self.means)?.f_div(&self.stds)?)
    }

    /// Maps standardized values back to the original scale.
    pub fn inverse_transform(&self, x: &Tensor) -> Result<Tensor> {
        self.check_width(x)?;
        let x = x.to_kind(Kind::Float);
        Ok(x.f_mul(&self.stds)?.f_add(&self.means)?)
    }

    fn check_width(&self, x: &Tensor) -> Result<()> {
        let columns = x.size().last().copied().unwrap_or(1);
        ensure!(
            columns == self.width(),
            "Scaler fitted on {} columns cannot scale a tensor of shape {:?}",
            self.width(),
            x.size()
        );
        Ok(())
    }

    /// Moves the statistics to `device`.
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            means: self.means.to_device(device),
            stds: self.stds.to_device(device),
        }
    }

    /// Moves the statistics onto the device of `tensor` if they live elsewhere.
    pub fn match_device(&mut self, tensor: &Tensor) {
        let device = tensor.device();
        if self.means.device() != device {
            self.means = self.means.to_device(device);
            self.stds = self.stds.to_device(device);
        }
    }

    /// Deep copy of the statistics.
    pub fn copy(&self) -> Self {
        Self {
            means: self.means.copy(),
            stds: self.stds.copy(),
        }
    }

    /// Writes this scaler to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        Tensor::save_multi(&[("means", &self.means), ("stds", &self.stds)], path)
            .with_context(|| format!("Failed to save scaler to {}", path.display()))
    }

    /// Reads a scaler written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut named = load_named(path)?;
        let means = take(&mut named, "means", path)?;
        let stds = take(&mut named, "stds", path)?;
        Self::new(means, stds)
    }

    /// Writes a list of scalers to a single file.
    pub fn save_list(path: impl AsRef<Path>, scalers: &[StandardScaler]) -> Result<()> {
        let path = path.as_ref();
        let mut named: Vec<(String, &Tensor)> = Vec::with_capacity(scalers.len() * 2);
        for (i, scaler) in scalers.iter().enumerate() {
            named.push((format!("{}.means", i), &scaler.means));
            named.push((format!("{}.stds", i), &scaler.stds));
        }
        Tensor::save_multi(&named, path)
            .with_context(|| format!("Failed to save scaler list to {}", path.display()))
    }

    /// Reads a list written by [`save_list`](Self::save_list), preserving order.
    pub fn load_list(path: impl AsRef<Path>) -> Result<Vec<StandardScaler>> {
        let path = path.as_ref();
        let mut named = load_named(path)?;
        if named.len() % 2 != 0 {
            bail!(
                "Scaler list {} holds {} tensors, expected means/stds pairs",
                path.display(),
                named.len()
            );
        }
        (0..named.len() / 2)
            .map(|i| {
                let means = take(&mut named, &format!("{}.means", i), path)?;
                let stds = take(&mut named, &format!("{}.stds", i), path)?;
                Self::new(means, stds)
            })
            .collect()
    }
}

fn load_named(path: &Path) -> Result<HashMap<String, Tensor>> {
    Ok(Tensor::load_multi(path)
        .with_context(|| format!("Failed to load scaler file {}", path.display()))?
        .into_iter()
        .collect())
}

fn take(named: &mut HashMap<String, Tensor>, key: &str, path: &Path) -> Result<Tensor> {
    named
        .remove(key)
        .with_context(|| format!("Scaler file {} has no tensor '{}'", path.display(), key))
}

/// Fits a scaler on feature `key` gathered from every record.
///
/// `key` is either `"scaled_lattice"` or the name of a property field.
/// Each record contributes one row, so the fitted statistics have one
/// entry per feature column.
pub fn get_scaler_from_data_list(records: &[CrystRecord], key: &str) -> Result<StandardScaler> {
    ensure!(
        !records.is_empty(),
        "Cannot fit scaler for '{}' on an empty data list",
        key
    );
    let rows: Vec<Vec<f64>> = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            record
                .feature(key)
                .with_context(|| format!("Record {} cannot provide '{}'", i, key))
        })
        .collect::<Result<_>>()?;

    let width = rows[0].len();
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
        bail!(
            "Feature '{}' has {} values in record {} but {} in record 0",
            key,
            row.len(),
            i,
            width
        );
    }

    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let targets = Tensor::from_slice(&flat).view([records.len() as i64, width as i64]);
    StandardScaler::fit(&targets).with_context(|| format!("Failed to fit scaler for '{}'", key))
}
