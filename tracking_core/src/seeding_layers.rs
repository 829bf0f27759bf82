//! Seeding layer catalog: named, ordered layer combinations.
//!
//! Sets are declared by layer name and resolved against the detector layout
//! once, when the catalog is built. Lookups of unknown set names are
//! configuration errors, raised while an iteration is validated.

use crate::error::ConfigError;
use detector_models::{DetectorLayout, LayerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the triplet set used by the second step.
pub const SEC_LAYER_TRIPLETS: &str = "SecLayerTriplets";

/// A resolved layer combination, innermost layer first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedingLayerSet {
    pub name: String,
    pub layers: Vec<LayerId>,
}

/// Declaration of a set by layer names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeedingLayerSetConfig {
    pub name: String,
    pub layers: Vec<String>,
}

impl SeedingLayerSetConfig {
    pub fn new(name: &str, layers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            layers: layers.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Sets shipped with the standard barrel layout.
pub fn standard_layer_sets() -> Vec<SeedingLayerSetConfig> {
    vec![
        SeedingLayerSetConfig::new(SEC_LAYER_TRIPLETS, &["BPix1", "BPix2", "BPix3"]),
        SeedingLayerSetConfig::new("MixedLayerTriplets", &["BPix2", "BPix3", "TIB1"]),
    ]
}

#[derive(Clone, Debug, Default)]
pub struct SeedingLayerCatalog {
    sets: BTreeMap<String, SeedingLayerSet>,
}

impl SeedingLayerCatalog {
    /// Resolve every declaration against `layout`.
    pub fn from_configs(
        layout: &DetectorLayout,
        configs: &[SeedingLayerSetConfig],
    ) -> Result<Self, ConfigError> {
        let mut catalog = Self::default();
        for config in configs {
            catalog.register(layout, config)?;
        }
        Ok(catalog)
    }

    pub fn register(
        &mut self,
        layout: &DetectorLayout,
        config: &SeedingLayerSetConfig,
    ) -> Result<(), ConfigError> {
        if self.sets.contains_key(&config.name) {
            return Err(ConfigError::DuplicateLayerSet(config.name.clone()));
        }
        if config.layers.len() < 3 {
            return Err(ConfigError::LayerSetTooShort {
                set: config.name.clone(),
                got: config.layers.len(),
            });
        }
        let layers = config
            .layers
            .iter()
            .map(|name| {
                layout
                    .layer_by_name(name)
                    .filter(|l| l.is_navigable())
                    .map(|l| l.id)
                    .ok_or_else(|| ConfigError::UnknownLayer {
                        set: config.name.clone(),
                        layer: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.sets.insert(
            config.name.clone(),
            SeedingLayerSet {
                name: config.name.clone(),
                layers,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&SeedingLayerSet, ConfigError> {
        self.sets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownLayerSet(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }
}
