use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::relationship::Relationship;

/// Stable identifier of an entity inside the world graph.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Ordinal narrative significance of an entity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Prominence {
    Forgotten,
    #[default]
    Marginal,
    Recognized,
    Renowned,
    Mythic,
}

impl Prominence {
    pub const ALL: [Prominence; 5] = [
        Prominence::Forgotten,
        Prominence::Marginal,
        Prominence::Recognized,
        Prominence::Renowned,
        Prominence::Mythic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Prominence::Forgotten => "forgotten",
            Prominence::Marginal => "marginal",
            Prominence::Recognized => "recognized",
            Prominence::Renowned => "renowned",
            Prominence::Mythic => "mythic",
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Prominence::Forgotten => 0,
            Prominence::Marginal => 1,
            Prominence::Recognized => 2,
            Prominence::Renowned => 3,
            Prominence::Mythic => 4,
        }
    }

    pub fn promote(self) -> Self {
        match self {
            Prominence::Forgotten => Prominence::Marginal,
            Prominence::Marginal => Prominence::Recognized,
            Prominence::Recognized => Prominence::Renowned,
            Prominence::Renowned | Prominence::Mythic => Prominence::Mythic,
        }
    }

    pub fn demote(self) -> Self {
        match self {
            Prominence::Forgotten | Prominence::Marginal => Prominence::Forgotten,
            Prominence::Recognized => Prominence::Marginal,
            Prominence::Renowned => Prominence::Recognized,
            Prominence::Mythic => Prominence::Renowned,
        }
    }
}

impl fmt::Display for Prominence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value attached to a tag key. Most tags are plain flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum TagValue {
    Flag(bool),
    Text(String),
}

impl Default for TagValue {
    fn default() -> Self {
        TagValue::Flag(true)
    }
}

pub type Tags = BTreeMap<String, TagValue>;

/// Build a tag map of plain flags.
pub fn flag_tags<I, S>(keys: I) -> Tags
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    keys.into_iter()
        .map(|key| (key.into(), TagValue::Flag(true)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemporalRange {
    pub start_tick: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_tick: Option<u64>,
}

/// Canonical entity record owned by the world graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HardState {
    pub id: EntityId,
    pub kind: String,
    pub subtype: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub prominence: Prominence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub links: Vec<Relationship>,
    pub coordinates: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalRange>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl HardState {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    pub fn age(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.created_at)
    }

    pub fn is(&self, kind: &str, subtype: Option<&str>) -> bool {
        self.kind == kind && subtype.map_or(true, |subtype| self.subtype == subtype)
    }
}
