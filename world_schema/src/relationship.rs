use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

pub const DEFAULT_RELATIONSHIP_STRENGTH: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    #[default]
    Active,
    Historical,
}

/// Directed edge between two entities. `(kind, src, dst)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Relationship {
    pub kind: String,
    pub src: EntityId,
    pub dst: EntityId,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub status: RelationshipStatus,
    #[serde(default)]
    pub created_at: u64,
}

impl Relationship {
    pub fn matches(&self, kind: &str, src: &EntityId, dst: &EntityId) -> bool {
        self.kind == kind && &self.src == src && &self.dst == dst
    }

    pub fn touches(&self, id: &EntityId) -> bool {
        &self.src == id || &self.dst == id
    }

    pub fn is_active(&self) -> bool {
        self.status == RelationshipStatus::Active
    }

    /// The endpoint opposite to `id`, if `id` is one of the endpoints.
    pub fn other(&self, id: &EntityId) -> Option<&EntityId> {
        if &self.src == id {
            Some(&self.dst)
        } else if &self.dst == id {
            Some(&self.src)
        } else {
            None
        }
    }
}

fn default_strength() -> f64 {
    DEFAULT_RELATIONSHIP_STRENGTH
}
