//! Declarative prerequisites and effects attached to templates and systems.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ComponentContract {
    pub enabled_by: Option<EnabledBy>,
    pub affects: Affects,
}

/// All listed conditions must hold for the component to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EnabledBy {
    pub pressures: Vec<PressureThreshold>,
    pub entity_counts: Vec<EntityCountCondition>,
    pub eras: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PressureThreshold {
    pub pressure_id: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityCountCondition {
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Affects {
    pub entities: Vec<EntityEffect>,
    pub relationships: Vec<RelationshipEffect>,
    pub pressures: Vec<PressureEffect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EffectOperation {
    #[default]
    Create,
    Modify,
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityEffect {
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub operation: EffectOperation,
    #[serde(default)]
    pub count: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RelationshipEffect {
    pub kind: String,
    #[serde(default)]
    pub operation: EffectOperation,
    #[serde(default)]
    pub count: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PressureEffect {
    pub pressure_id: String,
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub formula: Option<String>,
}

/// What a growth template says it produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TemplateMetadata {
    pub produces: Produces,
    pub effects: GraphEffects,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Produces {
    pub entity_kinds: Vec<ProducedEntity>,
    pub relationships: Vec<ProducedRelationship>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProducedEntity {
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default = "default_count_range")]
    pub count: (u32, u32),
    #[serde(default)]
    pub prominence: Option<crate::entity::Prominence>,
}

fn default_count_range() -> (u32, u32) {
    (1, 1)
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProducedRelationship {
    pub kind: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Coarse self-declared effect on graph shape, each in [-1, 1].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GraphEffects {
    pub graph_density: f64,
    pub cluster_formation: f64,
    pub diversity_impact: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SystemMetadata {
    pub effects: GraphEffects,
    pub relationship_kinds: Vec<String>,
    pub parameters: std::collections::BTreeMap<String, f64>,
}
