use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventKind {
    Growth,
    Simulation,
    Special,
    EraTransition,
    Consolidation,
}

/// One entry of the world's chronicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HistoryEvent {
    pub tick: u64,
    pub epoch: u32,
    pub era: String,
    pub kind: HistoryEventKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities_created: Vec<EntityId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships_created: Vec<RelationshipKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities_modified: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct RelationshipKey {
    pub kind: String,
    pub src: EntityId,
    pub dst: EntityId,
}
