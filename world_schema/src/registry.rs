use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entity::Prominence;

/// Per-kind (optionally per-subtype) record of which components create and
/// modify entities, how lineage is formed and what population is expected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EntityOperatorRegistry {
    pub kind: String,
    pub subtype: Option<String>,
    pub creators: Vec<CreatorRef>,
    pub modifiers: Vec<ModifierRef>,
    pub lineage: Option<LineageRule>,
    pub expected_distribution: ExpectedDistribution,
}

impl EntityOperatorRegistry {
    pub fn matches(&self, kind: &str, subtype: &str) -> bool {
        self.kind == kind
            && self
                .subtype
                .as_deref()
                .map_or(true, |expected| expected == subtype)
    }

    /// Conservative creation capacity: primary creators' target counts × 10.
    pub fn estimated_capacity(&self) -> u32 {
        self.creators
            .iter()
            .filter(|creator| creator.primary)
            .map(|creator| creator.target_count)
            .sum::<u32>()
            .saturating_mul(10)
    }

    pub fn label(&self) -> String {
        match &self.subtype {
            Some(subtype) => format!("{}:{}", self.kind, subtype),
            None => self.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CreatorRef {
    pub template_id: String,
    pub primary: bool,
    pub target_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ModifierRef {
    pub system_id: String,
    pub operation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExpectedDistribution {
    pub target_count: Option<u32>,
    pub prominence_distribution: BTreeMap<Prominence, f64>,
}

/// Automatic ancestor link for newly created entities of a kind.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LineageRule {
    pub relationship_kind: String,
    pub ancestor: AncestorSelector,
    #[serde(default = "default_distance_range")]
    pub distance_range: (f64, f64),
    #[serde(default)]
    pub strength: Option<f64>,
}

fn default_distance_range() -> (f64, f64) {
    (0.1, 0.4)
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AncestorSelector {
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub strategy: AncestorStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AncestorStrategy {
    #[default]
    MostRecent,
    Random,
    HighestProminence,
    SameCulture,
}
