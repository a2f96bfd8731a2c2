use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Taxonomy of known tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TagRegistry {
    pub tags: Vec<TagDefinition>,
}

impl TagRegistry {
    pub fn get(&self, tag: &str) -> Option<&TagDefinition> {
        self.tags.iter().find(|definition| definition.tag == tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    /// Whether two tags are declared as conflicting, in either direction.
    pub fn conflicts(&self, left: &str, right: &str) -> bool {
        let declared = |a: &str, b: &str| {
            self.get(a)
                .map(|definition| definition.conflicts_with.iter().any(|tag| tag == b))
                .unwrap_or(false)
        };
        declared(left, right) || declared(right, left)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TagDefinition {
    pub tag: String,
    pub category: String,
    pub rarity: TagRarity,
    pub description: String,
    pub conflicts_with: Vec<String>,
    pub related_tags: Vec<String>,
    pub max_usage: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TagRarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Legendary,
}
