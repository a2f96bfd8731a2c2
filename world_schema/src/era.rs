use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A narrative period supplying per-era multipliers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Era {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Allotted epoch count; falls back to the engine's `epochs_per_era`.
    pub epochs: Option<u32>,
    pub template_weights: BTreeMap<String, f64>,
    pub system_modifiers: BTreeMap<String, f64>,
    /// Additive per-epoch bias applied to the named pressures.
    pub pressure_modifiers: BTreeMap<String, f64>,
}

impl Era {
    /// Template weights not named by the era default to 1.0.
    pub fn template_weight(&self, template_id: &str) -> f64 {
        self.template_weights
            .get(template_id)
            .copied()
            .unwrap_or(1.0)
    }

    pub fn system_modifier(&self, system_id: &str) -> f64 {
        self.system_modifiers
            .get(system_id)
            .copied()
            .unwrap_or(1.0)
    }

    pub fn pressure_modifier(&self, pressure_id: &str) -> f64 {
        self.pressure_modifiers
            .get(pressure_id)
            .copied()
            .unwrap_or(0.0)
    }
}
