//! Preprocessed crystal records.
//!
//! One [`CrystRecord`] holds the graph arrays of a single crystal as produced
//! by an upstream preprocessing step (structure parsing and neighbour search
//! happen there, not here), plus any number of scalar or vector target
//! properties stored as extra fields.

use anyhow::{anyhow, bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Feature key of the derived 6-vector of lattice parameters.
pub const SCALED_LATTICE_KEY: &str = "scaled_lattice";

/// How lattice lengths are normalized before the lattice scaler sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatticeScaleMethod {
    /// Divide lengths by the cube root of the atom count.
    #[default]
    ScaleLength,
    /// Use raw lengths.
    #[serde(rename = "none")]
    Unscaled,
}

/// A single preprocessed crystal, one JSONL line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrystRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mp_id: Option<String>,
    pub frac_coords: Vec<[f64; 3]>,
    pub atom_types: Vec<i64>,
    pub lengths: [f64; 3],
    pub angles: [f64; 3],
    /// `[sources, targets]`; absent means no bonds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_index: Option<[Vec<i64>; 2]>,
    /// Periodic image offset of each bond's target; zeros when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_jimages: Option<Vec<[i64; 3]>>,
    #[serde(skip)]
    scaled_lattice: Vec<f64>,
    #[serde(flatten)]
    pub properties: HashMap<String, Value>,
}

impl CrystRecord {
    pub fn num_atoms(&self) -> usize {
        self.atom_types.len()
    }

    pub fn num_bonds(&self) -> usize {
        self.edge_index.as_ref().map_or(0, |e| e[0].len())
    }

    /// Checks that the graph arrays agree with each other.
    pub fn validate(&self) -> Result<()> {
        let n = self.num_atoms();
        ensure!(n > 0, "Crystal has no atoms");
        ensure!(
            self.frac_coords.len() == n,
            "frac_coords has {} rows but atom_types has {} entries",
            self.frac_coords.len(),
            n
        );
        if let Some([src, dst]) = &self.edge_index {
            ensure!(
                src.len() == dst.len(),
                "edge_index rows differ in length ({} vs {})",
                src.len(),
                dst.len()
            );
            if let Some(&bad) = src.iter().chain(dst.iter()).find(|&&i| i < 0 || i as usize >= n) {
                bail!("edge_index refers to atom {} of a {}-atom crystal", bad, n);
            }
        }
        if let Some(images) = &self.to_jimages {
            ensure!(
                images.len() == self.num_bonds(),
                "to_jimages has {} rows but there are {} bonds",
                images.len(),
                self.num_bonds()
            );
        }
        Ok(())
    }

    /// Computes and stores the scaled lattice for `method`.
    pub fn with_scaled_lattice(mut self, method: LatticeScaleMethod) -> Self {
        let scale = match method {
            LatticeScaleMethod::ScaleLength => (self.num_atoms() as f64).cbrt(),
            LatticeScaleMethod::Unscaled => 1.0,
        };
        self.scaled_lattice = self
            .lengths
            .iter()
            .map(|l| l / scale)
            .chain(self.angles.iter().copied())
            .collect();
        self
    }

    /// The scaled lattice, empty until [`with_scaled_lattice`](Self::with_scaled_lattice) ran.
    pub fn scaled_lattice(&self) -> &[f64] {
        &self.scaled_lattice
    }

    /// Numeric values of a property field. Scalars yield one value.
    pub fn property(&self, name: &str) -> Result<Vec<f64>> {
        let value = self
            .properties
            .get(name)
            .ok_or_else(|| anyhow!("Property '{}' not found", name))?;
        numeric_values(value).with_context(|| format!("Property '{}' is not numeric", name))
    }

    /// Values of `key`, which names either the scaled lattice or a property.
    pub fn feature(&self, key: &str) -> Result<Vec<f64>> {
        if key == SCALED_LATTICE_KEY {
            ensure!(
                !self.scaled_lattice.is_empty(),
                "Scaled lattice has not been computed for this record"
            );
            return Ok(self.scaled_lattice.clone());
        }
        self.property(key)
    }
}

fn numeric_values(value: &Value) -> Result<Vec<f64>> {
    match value {
        Value::Number(n) => Ok(vec![n
            .as_f64()
            .ok_or_else(|| anyhow!("{} is not representable as f64", n))?]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_f64()
                    .ok_or_else(|| anyhow!("Array element {} is not a number", item))
            })
            .collect(),
        other => bail!("Expected a number or numeric array, got {}", other),
    }
}
