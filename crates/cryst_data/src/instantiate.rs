//! Generic object instantiation from configuration nodes.
//!
//! A configuration node names what to build through its `_target_` key and
//! carries the keyword arguments for that builder in its remaining keys:
//!
//! ```yaml
//! _target_: cryst_data.CrystDataset
//! name: Formation energy train
//! path: data/mp_20/train.jsonl
//! prop: [formation_energy_per_atom]
//! ```
//!
//! A [`Registry`] maps target names to builder closures and turns such nodes
//! into values.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// A configuration node: a target name plus keyword parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(rename = "_target_")]
    pub target: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl TargetConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            params: serde_json::Map::new(),
        }
    }

    /// Adds or overwrites one keyword parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Deserializes the keyword parameters into `P`.
    pub fn params<P: DeserializeOwned>(&self) -> Result<P> {
        serde_json::from_value(serde_json::Value::Object(self.params.clone())).with_context(|| {
            format!(
                "Invalid parameters for '{}': expected {}",
                self.target,
                std::any::type_name::<P>()
            )
        })
    }

    /// Value of the `name` parameter, when present.
    pub fn name(&self) -> Option<&str> {
        self.params.get("name").and_then(|v| v.as_str())
    }
}

impl fmt::Display for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({:?})", self.target, name),
            None => write!(f, "{}", self.target),
        }
    }
}

type Builder<T> = Box<dyn Fn(&TargetConfig) -> Result<T> + Send + Sync>;

/// Builders keyed by target name.
pub struct Registry<T> {
    builders: BTreeMap<String, Builder<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("targets", &self.targets().collect::<Vec<_>>())
            .finish()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `builder` under `target`, replacing any previous builder.
    pub fn register<F>(&mut self, target: impl Into<String>, builder: F) -> &mut Self
    where
        F: Fn(&TargetConfig) -> Result<T> + Send + Sync + 'static,
    {
        self.builders.insert(target.into(), Box::new(builder));
        self
    }

    pub fn contains(&self, target: &str) -> bool {
        self.builders.contains_key(target)
    }

    /// Registered target names, sorted.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    /// Builds the value described by `config`.
    pub fn instantiate(&self, config: &TargetConfig) -> Result<T> {
        let builder = self.builders.get(&config.target).ok_or_else(|| {
            anyhow!(
                "Unknown target '{}'. Registered targets: {:?}",
                config.target,
                self.targets().collect::<Vec<_>>()
            )
        })?;
        debug!(target_name = %config.target, "Instantiating {}", config);
        builder(config).with_context(|| format!("Failed to instantiate {}", config))
    }

    /// Builds every node of `configs`, in order.
    pub fn instantiate_all(&self, configs: &[TargetConfig]) -> Result<Vec<T>> {
        configs.iter().map(|c| self.instantiate(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[derive(Debug, Deserialize)]
    struct Point {
        x: i64,
        #[serde(default)]
        y: i64,
    }

    fn registry() -> Registry<(i64, i64)> {
        let mut registry = Registry::new();
        registry.register("Point", |cfg: &TargetConfig| {
            let p: Point = cfg.params()?;
            Ok((p.x, p.y))
        });
        registry.register("Broken", |_: &TargetConfig| bail!("always fails"));
        registry
    }

    #[test]
    fn test_instantiate_passes_params() -> Result<()> {
        let cfg = TargetConfig::new("Point").with_param("x", 3).with_param("y", 4);
        assert_eq!(registry().instantiate(&cfg)?, (3, 4));

        let cfg = TargetConfig::new("Point").with_param("x", 1);
        assert_eq!(registry().instantiate(&cfg)?, (1, 0));
        Ok(())
    }

    #[test]
    fn test_unknown_target_lists_registered_ones() {
        let err = registry().instantiate(&TargetConfig::new("Circle")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Circle"));
        assert!(msg.contains("Point"));
    }

    #[test]
    fn test_targets_are_sorted() {
        let reg = registry();
        let targets: Vec<&str> = reg.targets().collect();
        assert_eq!(targets, vec!["Broken", "Point"]);
        assert_eq!(
            format!("{:?}", registry()),
            "Registry { targets: [\"Broken\", \"Point\"] }"
        );
    }

    #[test]
    fn test_bad_params_and_builder_errors_propagate() {
        let missing_x = TargetConfig::new("Point").with_param("y", 1);
        assert!(registry().instantiate(&missing_x).is_err());

        let err = registry().instantiate(&TargetConfig::new("Broken")).unwrap_err();
        assert!(format!("{:#}", err).contains("always fails"));
    }

    #[test]
    fn test_target_config_yaml_shape() -> Result<()> {
        let cfg: TargetConfig = serde_yaml::from_str(
            "_target_: Point\nname: origin\nx: 0\n",
        )?;
        assert_eq!(cfg.target, "Point");
        assert_eq!(cfg.name(), Some("origin"));
        assert_eq!(cfg.to_string(), "Point(\"origin\")");
        assert_eq!(registry().instantiate(&cfg)?, (0, 0));
        Ok(())
    }

    #[test]
    fn test_instantiate_all_keeps_order() -> Result<()> {
        let cfgs = vec![
            TargetConfig::new("Point").with_param("x", 2),
            TargetConfig::new("Point").with_param("x", 1),
        ];
        assert_eq!(registry().instantiate_all(&cfgs)?, vec![(2, 0), (1, 0)]);
        Ok(())
    }
}
