use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Top-level shape of a declarative pressure file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PressureFile {
    pub pressures: Vec<DeclarativePressure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeclarativePressure {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub initial_value: f64,
    #[serde(default)]
    pub decay: f64,
    #[serde(default)]
    pub growth: PressureGrowth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<PressureContract>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PressureGrowth {
    pub base_growth: f64,
    pub positive_feedback: Vec<FeedbackFactor>,
    pub negative_feedback: Vec<FeedbackFactor>,
    pub max_growth: Option<f64>,
}

/// A single term contributing to a pressure's growth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackFactor {
    EntityCount {
        kind: String,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        status: Option<String>,
        coefficient: f64,
        #[serde(default)]
        cap: Option<f64>,
    },
    RelationshipCount {
        relationship_kinds: Vec<String>,
        coefficient: f64,
        #[serde(default)]
        cap: Option<f64>,
    },
    TagCount {
        tags: Vec<String>,
        coefficient: f64,
        #[serde(default)]
        cap: Option<f64>,
    },
    Ratio {
        numerator: CountSelector,
        denominator: CountSelector,
        coefficient: f64,
        #[serde(default)]
        fallback_value: Option<f64>,
        #[serde(default)]
        cap: Option<f64>,
    },
    StatusRatio {
        kind: String,
        #[serde(default)]
        subtype: Option<String>,
        alive_status: String,
        coefficient: f64,
        #[serde(default)]
        cap: Option<f64>,
    },
    CrossCultureRatio {
        relationship_kinds: Vec<String>,
        coefficient: f64,
        #[serde(default)]
        cap: Option<f64>,
    },
}

impl FeedbackFactor {
    pub fn coefficient(&self) -> f64 {
        match self {
            FeedbackFactor::EntityCount { coefficient, .. }
            | FeedbackFactor::RelationshipCount { coefficient, .. }
            | FeedbackFactor::TagCount { coefficient, .. }
            | FeedbackFactor::Ratio { coefficient, .. }
            | FeedbackFactor::StatusRatio { coefficient, .. }
            | FeedbackFactor::CrossCultureRatio { coefficient, .. } => *coefficient,
        }
    }

    pub fn cap(&self) -> Option<f64> {
        match self {
            FeedbackFactor::EntityCount { cap, .. }
            | FeedbackFactor::RelationshipCount { cap, .. }
            | FeedbackFactor::TagCount { cap, .. }
            | FeedbackFactor::Ratio { cap, .. }
            | FeedbackFactor::StatusRatio { cap, .. }
            | FeedbackFactor::CrossCultureRatio { cap, .. } => *cap,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeedbackFactor::EntityCount { .. } => "entity_count",
            FeedbackFactor::RelationshipCount { .. } => "relationship_count",
            FeedbackFactor::TagCount { .. } => "tag_count",
            FeedbackFactor::Ratio { .. } => "ratio",
            FeedbackFactor::StatusRatio { .. } => "status_ratio",
            FeedbackFactor::CrossCultureRatio { .. } => "cross_culture_ratio",
        }
    }
}

/// What a `ratio` factor counts on either side of the fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CountSelector {
    Entities {
        kind: String,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        status: Option<String>,
    },
    Relationships {
        relationship_kinds: Vec<String>,
    },
    Tags {
        tags: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PressureContract {
    pub sources: Vec<ComponentFlow>,
    pub sinks: Vec<ComponentFlow>,
    pub equilibrium: Option<Equilibrium>,
}

/// A template, system or pressure feeding (source) or draining (sink) a
/// pressure. `delta` is a fixed per-epoch contribution when known.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ComponentFlow {
    pub component: String,
    pub delta: Option<f64>,
    pub formula: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Equilibrium {
    pub expected_range: (f64, f64),
    pub resting_point: f64,
    #[serde(default)]
    pub oscillation_period: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_factors_parse_as_tagged_union() {
        let json = r#"{
            "pressures": [{
                "id": "conflict",
                "initial_value": 20,
                "decay": 2,
                "growth": {
                    "base_growth": 1,
                    "positive_feedback": [
                        {"type": "relationship_count", "relationship_kinds": ["at_war_with"], "coefficient": 0.5, "cap": 10},
                        {"type": "ratio",
                         "numerator": {"type": "entities", "kind": "faction"},
                         "denominator": {"type": "entities", "kind": "location"},
                         "coefficient": 3}
                    ],
                    "negative_feedback": [
                        {"type": "relationship_count", "relationship_kinds": ["allied_with"], "coefficient": 0.25}
                    ]
                }
            }]
        }"#;
        let file: PressureFile = serde_json::from_str(json).expect("pressure file should parse");
        let growth = &file.pressures[0].growth;
        assert_eq!(growth.positive_feedback.len(), 2);
        assert_eq!(growth.positive_feedback[0].label(), "relationship_count");
        assert_eq!(growth.positive_feedback[0].cap(), Some(10.0));
        assert_eq!(growth.negative_feedback[0].coefficient(), 0.25);
    }

    #[test]
    fn unknown_factor_type_is_rejected_at_load() {
        let json = r#"{"type": "moon_phase", "coefficient": 1}"#;
        assert!(serde_json::from_str::<FeedbackFactor>(json).is_err());
    }
}
