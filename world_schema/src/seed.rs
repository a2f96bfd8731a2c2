use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entity::HardState;

/// Initial world state loaded before the first epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WorldSeed {
    pub entities: Vec<HardState>,
    pub relationships: Vec<SeedRelationship>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SeedRelationship {
    pub kind: String,
    pub src: String,
    pub dst: String,
    #[serde(default)]
    pub strength: Option<f64>,
    #[serde(default)]
    pub distance: Option<f64>,
}
