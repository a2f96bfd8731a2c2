use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Read-only description of the world's vocabulary: entity kinds,
/// relationship kinds and cultures.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DomainSchema {
    pub id: String,
    pub name: String,
    pub entity_kinds: Vec<EntityKindDefinition>,
    pub relationship_kinds: Vec<RelationshipKindDefinition>,
    pub cultures: Vec<CultureDefinition>,
}

impl DomainSchema {
    pub fn entity_kind(&self, kind: &str) -> Option<&EntityKindDefinition> {
        self.entity_kinds.iter().find(|entry| entry.kind == kind)
    }

    pub fn relationship_kind(&self, kind: &str) -> Option<&RelationshipKindDefinition> {
        self.relationship_kinds.iter().find(|entry| entry.kind == kind)
    }

    pub fn has_entity_kind(&self, kind: &str) -> bool {
        self.entity_kind(kind).is_some()
    }

    pub fn kind_names(&self) -> impl Iterator<Item = &str> {
        self.entity_kinds.iter().map(|entry| entry.kind.as_str())
    }

    pub fn culture_ids(&self) -> impl Iterator<Item = &str> {
        self.cultures.iter().map(|culture| culture.id.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EntityKindDefinition {
    pub kind: String,
    pub description: String,
    pub subtypes: Vec<String>,
    pub statuses: Vec<String>,
    pub default_status: String,
}

impl EntityKindDefinition {
    pub fn has_subtype(&self, subtype: &str) -> bool {
        self.subtypes.iter().any(|entry| entry == subtype)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RelationshipKindDefinition {
    pub kind: String,
    pub category: String,
    pub src_kinds: Vec<String>,
    pub dst_kinds: Vec<String>,
    pub symmetric: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CultureDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
}
