use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declared causal link between two observable metrics, checked after the
/// fact. Loops never gate execution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FeedbackLoop {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub source: MetricRef,
    pub target: MetricRef,
    pub polarity: LoopPolarity,
    /// Epochs between a change in the source and the response in the target.
    #[serde(default)]
    pub lag: u32,
    /// Correlations weaker than this are treated as no signal.
    #[serde(default = "default_min_strength")]
    pub min_strength: f64,
}

fn default_min_strength() -> f64 {
    0.1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoopPolarity {
    /// Target moves in the same direction as the source.
    Positive,
    /// Target moves against the source.
    Negative,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricRef {
    Pressure {
        id: String,
    },
    EntityCount {
        kind: String,
        #[serde(default)]
        subtype: Option<String>,
    },
    RelationshipCount {
        kind: String,
    },
    TotalEntities,
    TotalRelationships,
}

impl MetricRef {
    pub fn key(&self) -> String {
        match self {
            MetricRef::Pressure { id } => format!("pressure:{id}"),
            MetricRef::EntityCount {
                kind,
                subtype: Some(subtype),
            } => format!("entities:{kind}:{subtype}"),
            MetricRef::EntityCount {
                kind,
                subtype: None,
            } => format!("entities:{kind}"),
            MetricRef::RelationshipCount { kind } => format!("relationships:{kind}"),
            MetricRef::TotalEntities => "entities".to_string(),
            MetricRef::TotalRelationships => "relationships".to_string(),
        }
    }
}
