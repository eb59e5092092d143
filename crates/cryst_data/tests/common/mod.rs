#![allow(dead_code)]

use cryst_data::readers::JsonlSource;
use cryst_data::{CrystRecord, Dataset, Sample};

use anyhow::{bail, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tch::Tensor;

/// Property every synthetic crystal carries.
pub const ENERGY: &str = "formation_energy_per_atom";

/// A small synthetic crystal: `1 + i % 3` atoms on a cubic cell of edge
/// `3 + i`, bonded in a chain, with energy `-(i as f64) / 10`.
pub fn crystal(i: usize) -> Result<CrystRecord> {
    let n = 1 + i % 3;
    let frac_coords: Vec<[f64; 3]> = (0..n)
        .map(|a| {
            let x = a as f64 / n as f64;
            [x, x, x]
        })
        .collect();
    let src: Vec<i64> = (0..n as i64 - 1).collect();
    let dst: Vec<i64> = (1..n as i64).collect();
    let images: Vec<[i64; 3]> = vec![[0, 0, 0]; src.len()];
    let edge = 3.0 + i as f64;

    Ok(serde_json::from_value(json!({
        "mp_id": format!("mp-{}", i),
        "frac_coords": frac_coords,
        "atom_types": vec![6 + i as i64 % 3; n],
        "lengths": [edge, edge, edge],
        "angles": [90.0, 90.0, 90.0],
        "edge_index": [src, dst],
        "to_jimages": images,
        ENERGY: -(i as f64) / 10.0,
    }))?)
}

pub fn crystals(range: std::ops::Range<usize>) -> Result<Vec<CrystRecord>> {
    range.map(crystal).collect()
}

/// Writes crystals `range` to `dir/name.jsonl`.
pub fn write_split(dir: &Path, name: &str, range: std::ops::Range<usize>) -> Result<PathBuf> {
    let path = dir.join(format!("{}.jsonl", name));
    JsonlSource::new(&path).write_all(&crystals(range)?)?;
    Ok(path)
}

/// YAML config with a 20-crystal train split, one val and one test split.
pub fn write_config(dir: &Path, num_workers: usize, scaler_path: Option<&Path>) -> Result<String> {
    let train = write_split(dir, "train", 0..20)?;
    let val = write_split(dir, "val", 20..26)?;
    let test = write_split(dir, "test", 26..31)?;
    let scaler_path = match scaler_path {
        Some(p) => format!("{:?}", p.display().to_string()),
        None => "null".to_string(),
    };
    Ok(format!(
        r#"
datasets:
  train:
    _target_: cryst_data.CrystDataset
    name: synthetic train
    path: {train:?}
    prop: {ENERGY}
    lattice_scale_method: scale_length
  val:
    - _target_: cryst_data.CrystDataset
      name: synthetic val
      path: {val:?}
      prop: [{ENERGY}]
  test:
    - _target_: CrystDataset
      name: synthetic test
      path: {test:?}
      prop: [{ENERGY}]
num_workers: {{train: {num_workers}, val: {num_workers}, test: 0}}
batch_size: {{train: 8, val: 4, test: 4}}
scaler_path: {scaler_path}
seed: 42
"#
    ))
}

/// Dataset of single-atom graphs tagged with their index.
///
/// Sleeps `delay` per sample, fails on `fail_at`, and panics on `panic_at`.
pub struct TaggedDataset {
    pub len: usize,
    pub delay: Duration,
    pub fail_at: Option<usize>,
    pub panic_at: Option<usize>,
}

impl TaggedDataset {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            delay: Duration::ZERO,
            fail_at: None,
            panic_at: None,
        }
    }
}

impl Dataset for TaggedDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn get_sample(&self, index: usize) -> Result<Sample> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if Some(index) == self.fail_at {
            bail!("corrupt crystal {}", index);
        }
        if Some(index) == self.panic_at {
            panic!("worker blew up on {}", index);
        }
        Ok(Sample::from_single("num_atoms", Tensor::from_slice(&[1i64]))
            .with_feature("index", Tensor::from_slice(&[index as i64])))
    }
}
