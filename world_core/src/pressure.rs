//! Declarative pressures compiled into runtime growth functions.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use world_schema::{
    CountSelector, DeclarativePressure, Era, FeedbackFactor, PressureContract, PressureFile,
};

use crate::graph::WorldGraph;

pub const PRESSURE_MIN: f64 = 0.0;
pub const PRESSURE_MAX: f64 = 100.0;

pub type GrowthFn = Box<dyn Fn(&WorldGraph) -> f64 + Send + Sync>;

#[derive(Debug, Error)]
pub enum PressureLoadError {
    #[error("failed to parse pressure file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("pressure definition has an empty id")]
    EmptyId,
    #[error("duplicate pressure id {id}")]
    Duplicate { id: String },
    #[error("pressure {id}: {field} must be finite")]
    NonFinite { id: String, field: String },
    #[error("pressure {id}: initial value {value} outside [0, 100]")]
    InitialOutOfRange { id: String, value: f64 },
}

/// Tuning for the per-epoch pressure update.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PressureSettings {
    pub max_delta: f64,
    pub min_growth_scaling: f64,
    /// Pull towards a declared resting point, scaled by overall deviation.
    pub feedback_gain: f64,
}

impl Default for PressureSettings {
    fn default() -> Self {
        Self {
            max_delta: 15.0,
            min_growth_scaling: 0.1,
            feedback_gain: 0.05,
        }
    }
}

pub struct Pressure {
    pub id: String,
    pub name: String,
    pub description: String,
    pub initial_value: f64,
    pub decay: f64,
    pub contract: Option<PressureContract>,
    growth: GrowthFn,
}

impl std::fmt::Debug for Pressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pressure")
            .field("id", &self.id)
            .field("initial_value", &self.initial_value)
            .field("decay", &self.decay)
            .finish_non_exhaustive()
    }
}

impl Pressure {
    pub fn new(id: impl Into<String>, initial_value: f64, decay: f64, growth: GrowthFn) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            initial_value,
            decay,
            contract: None,
            growth,
        }
    }

    pub fn growth(&self, graph: &WorldGraph) -> f64 {
        let value = (self.growth)(graph);
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }

    pub fn resting_point(&self) -> Option<f64> {
        self.contract
            .as_ref()
            .and_then(|contract| contract.equilibrium.as_ref())
            .map(|equilibrium| equilibrium.resting_point)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PressureUpdate {
    pub id: String,
    pub previous: f64,
    pub growth: f64,
    pub delta: f64,
    pub value: f64,
}

pub fn load_pressure_file(json: &str) -> Result<Vec<Pressure>, PressureLoadError> {
    let file: PressureFile = serde_json::from_str(json)?;
    compile_pressures(&file.pressures)
}

pub fn compile_pressures(
    definitions: &[DeclarativePressure],
) -> Result<Vec<Pressure>, PressureLoadError> {
    let mut seen = BTreeSet::new();
    let mut compiled = Vec::with_capacity(definitions.len());
    for definition in definitions {
        validate_definition(definition)?;
        if !seen.insert(definition.id.as_str()) {
            return Err(PressureLoadError::Duplicate {
                id: definition.id.clone(),
            });
        }
        compiled.push(compile_pressure(definition));
    }
    Ok(compiled)
}

pub fn compile_pressure(definition: &DeclarativePressure) -> Pressure {
    let growth = definition.growth.clone();
    Pressure {
        id: definition.id.clone(),
        name: if definition.name.is_empty() {
            definition.id.clone()
        } else {
            definition.name.clone()
        },
        description: definition.description.clone(),
        initial_value: definition.initial_value,
        decay: definition.decay,
        contract: definition.contract.clone(),
        growth: Box::new(move |graph: &WorldGraph| {
            let positive: f64 = growth
                .positive_feedback
                .iter()
                .map(|factor| evaluate_factor(factor, graph))
                .sum();
            let negative: f64 = growth
                .negative_feedback
                .iter()
                .map(|factor| evaluate_factor(factor, graph))
                .sum();
            let total = (growth.base_growth + positive - negative).max(0.0);
            match growth.max_growth {
                Some(cap) => total.min(cap),
                None => total,
            }
        }),
    }
}

fn validate_definition(definition: &DeclarativePressure) -> Result<(), PressureLoadError> {
    if definition.id.trim().is_empty() {
        return Err(PressureLoadError::EmptyId);
    }
    let id = &definition.id;
    let finite = |field: &str, value: f64| {
        if value.is_finite() {
            Ok(())
        } else {
            Err(PressureLoadError::NonFinite {
                id: id.clone(),
                field: field.to_string(),
            })
        }
    };
    finite("initial_value", definition.initial_value)?;
    finite("decay", definition.decay)?;
    finite("growth.base_growth", definition.growth.base_growth)?;
    if let Some(max_growth) = definition.growth.max_growth {
        finite("growth.max_growth", max_growth)?;
    }
    for factor in definition
        .growth
        .positive_feedback
        .iter()
        .chain(&definition.growth.negative_feedback)
    {
        finite(&format!("{}.coefficient", factor.label()), factor.coefficient())?;
        if let Some(cap) = factor.cap() {
            finite(&format!("{}.cap", factor.label()), cap)?;
        }
    }
    if !(PRESSURE_MIN..=PRESSURE_MAX).contains(&definition.initial_value) {
        return Err(PressureLoadError::InitialOutOfRange {
            id: id.clone(),
            value: definition.initial_value,
        });
    }
    Ok(())
}

/// Contribution of one factor: raw measure × coefficient, then capped.
pub fn evaluate_factor(factor: &FeedbackFactor, graph: &WorldGraph) -> f64 {
    let raw = match factor {
        FeedbackFactor::EntityCount {
            kind,
            subtype,
            status,
            ..
        } => count_entities(graph, kind, subtype.as_deref(), status.as_deref()) as f64,
        FeedbackFactor::RelationshipCount {
            relationship_kinds, ..
        } => count_relationships(graph, relationship_kinds) as f64,
        FeedbackFactor::TagCount { tags, .. } => count_tagged(graph, tags) as f64,
        FeedbackFactor::Ratio {
            numerator,
            denominator,
            fallback_value,
            ..
        } => {
            let denominator = count_selector(graph, denominator);
            if denominator == 0 {
                fallback_value.unwrap_or(0.0)
            } else {
                count_selector(graph, numerator) as f64 / denominator as f64
            }
        }
        FeedbackFactor::StatusRatio {
            kind,
            subtype,
            alive_status,
            ..
        } => {
            let total = count_entities(graph, kind, subtype.as_deref(), None);
            if total == 0 {
                0.0
            } else {
                count_entities(graph, kind, subtype.as_deref(), Some(alive_status)) as f64
                    / total as f64
            }
        }
        FeedbackFactor::CrossCultureRatio {
            relationship_kinds, ..
        } => cross_culture_ratio(graph, relationship_kinds),
    };
    let contribution = raw * factor.coefficient();
    match factor.cap() {
        Some(cap) => contribution.min(cap),
        None => contribution,
    }
}

fn count_entities(
    graph: &WorldGraph,
    kind: &str,
    subtype: Option<&str>,
    status: Option<&str>,
) -> usize {
    graph
        .iter_entities()
        .filter(|entity| {
            entity.kind == kind
                && subtype.map_or(true, |subtype| entity.subtype == subtype)
                && status.map_or(true, |status| entity.status == status)
        })
        .count()
}

fn count_relationships(graph: &WorldGraph, kinds: &[String]) -> usize {
    graph
        .iter_relationships()
        .filter(|relationship| relationship.is_active() && kinds.contains(&relationship.kind))
        .count()
}

fn count_tagged(graph: &WorldGraph, tags: &[String]) -> usize {
    graph
        .iter_entities()
        .filter(|entity| tags.iter().any(|tag| entity.has_tag(tag)))
        .count()
}

fn count_selector(graph: &WorldGraph, selector: &CountSelector) -> usize {
    match selector {
        CountSelector::Entities {
            kind,
            subtype,
            status,
        } => count_entities(graph, kind, subtype.as_deref(), status.as_deref()),
        CountSelector::Relationships { relationship_kinds } => {
            count_relationships(graph, relationship_kinds)
        }
        CountSelector::Tags { tags } => count_tagged(graph, tags),
    }
}

/// Share of matching relationships whose endpoints carry different cultures.
/// Relationships with an endpoint lacking a culture are ignored.
fn cross_culture_ratio(graph: &WorldGraph, kinds: &[String]) -> f64 {
    let mut total = 0usize;
    let mut crossing = 0usize;
    for relationship in graph.iter_relationships() {
        if !relationship.is_active() || !kinds.contains(&relationship.kind) {
            continue;
        }
        let cultures = (
            graph
                .entity_ref(&relationship.src)
                .and_then(|entity| entity.culture.as_deref()),
            graph
                .entity_ref(&relationship.dst)
                .and_then(|entity| entity.culture.as_deref()),
        );
        if let (Some(src), Some(dst)) = cultures {
            total += 1;
            if src != dst {
                crossing += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        crossing as f64 / total as f64
    }
}

/// One pressure step: diminishing growth near the ceiling, subtractive decay,
/// additive era and feedback terms, smoothed and clamped.
pub fn next_pressure_value(
    current: f64,
    growth: f64,
    decay: f64,
    era_modifier: f64,
    feedback: f64,
    settings: &PressureSettings,
) -> f64 {
    let current = if current.is_finite() {
        current.clamp(PRESSURE_MIN, PRESSURE_MAX)
    } else {
        PRESSURE_MIN
    };
    let scaling = (1.0 - (current / PRESSURE_MAX).powi(2)).max(settings.min_growth_scaling);
    let delta = growth * scaling - decay + era_modifier + feedback;
    let delta = if delta.is_finite() {
        delta.clamp(-settings.max_delta, settings.max_delta)
    } else {
        0.0
    };
    (current + delta).clamp(PRESSURE_MIN, PRESSURE_MAX)
}

/// Steady state solved from the fixed terms of a definition: base growth and
/// declared source/sink deltas against decay. Dynamic factors are ignored.
pub fn predicted_equilibrium(definition: &DeclarativePressure, min_growth_scaling: f64) -> f64 {
    let (sources, sinks) = definition
        .contract
        .as_ref()
        .map(|contract| {
            let sum = |flows: &[world_schema::ComponentFlow]| -> f64 {
                flows.iter().filter_map(|flow| flow.delta).sum()
            };
            (sum(&contract.sources), sum(&contract.sinks))
        })
        .unwrap_or((0.0, 0.0));
    let net_growth = definition.growth.base_growth + sources;
    let drain = definition.decay + sinks;
    if net_growth <= 0.0 || drain >= net_growth {
        return PRESSURE_MIN;
    }
    let scaling = drain / net_growth;
    if scaling <= min_growth_scaling {
        return PRESSURE_MAX;
    }
    PRESSURE_MAX * (1.0 - scaling).sqrt()
}

pub struct PressureInterpreter {
    pressures: Vec<Pressure>,
    settings: PressureSettings,
}

impl PressureInterpreter {
    pub fn new(pressures: Vec<Pressure>, settings: PressureSettings) -> Self {
        Self {
            pressures,
            settings,
        }
    }

    pub fn pressures(&self) -> &[Pressure] {
        &self.pressures
    }

    pub fn initialize(&self, graph: &mut WorldGraph) {
        for pressure in &self.pressures {
            graph.set_pressure(&pressure.id, pressure.initial_value);
        }
    }

    /// Recompute every pressure once, in declaration order. Growth for all
    /// pressures is evaluated against the same pre-update graph.
    pub fn update(
        &self,
        graph: &mut WorldGraph,
        era: Option<&Era>,
        overall_deviation: f64,
    ) -> Vec<PressureUpdate> {
        let growths: Vec<f64> = self
            .pressures
            .iter()
            .map(|pressure| pressure.growth(graph))
            .collect();
        let mut updates = Vec::with_capacity(self.pressures.len());
        for (pressure, growth) in self.pressures.iter().zip(growths) {
            let previous = graph.pressure(&pressure.id);
            let era_modifier = era.map_or(0.0, |era| era.pressure_modifier(&pressure.id));
            let feedback = pressure.resting_point().map_or(0.0, |resting| {
                -(previous - resting) * self.settings.feedback_gain * (1.0 + overall_deviation)
            });
            let value = next_pressure_value(
                previous,
                growth,
                pressure.decay,
                era_modifier,
                feedback,
                &self.settings,
            );
            graph.set_pressure(&pressure.id, value);
            debug!(
                target: "worldgen::pressure",
                pressure = %pressure.id,
                previous,
                growth,
                value,
                "pressure.updated"
            );
            updates.push(PressureUpdate {
                id: pressure.id.clone(),
                previous,
                growth,
                delta: value - previous,
                value,
            });
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityDraft, NewRelationship};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use world_schema::{Point, PressureGrowth};

    const CONFLICT: &str = r#"{
        "pressures": [{
            "id": "conflict",
            "initial_value": 20,
            "decay": 1.0,
            "growth": {
                "base_growth": 0.5,
                "positive_feedback": [
                    { "type": "relationship_count", "relationship_kinds": ["at_war_with"], "coefficient": 2.0, "cap": 5.0 },
                    { "type": "ratio",
                      "numerator": { "type": "entities", "kind": "npc", "status": "alive" },
                      "denominator": { "type": "entities", "kind": "npc" },
                      "coefficient": 1.0,
                      "fallback_value": 0.25 }
                ],
                "negative_feedback": [
                    { "type": "entity_count", "kind": "faction", "coefficient": 0.1 }
                ]
            }
        }]
    }"#;

    fn spawn(graph: &mut WorldGraph, kind: &str, status: &str, culture: &str) -> world_schema::EntityId {
        let x = graph.entity_count() as f64 * 5.0;
        graph
            .create_entity(EntityDraft {
                name: Some(format!("{kind}{x}")),
                status: status.to_string(),
                culture: Some(culture.to_string()),
                coordinates: Some(Point::new(x, 0.0, 0.0)),
                ..EntityDraft::new(kind, "default")
            })
            .expect("create")
    }

    #[test]
    fn growth_combines_factors() {
        let pressures = load_pressure_file(CONFLICT).expect("parse");
        let mut graph = WorldGraph::default();
        // Empty denominator takes the fallback.
        assert!((pressures[0].growth(&graph) - 0.75).abs() < 1e-9);

        let a = spawn(&mut graph, "faction", "active", "north");
        let b = spawn(&mut graph, "faction", "active", "south");
        spawn(&mut graph, "npc", "alive", "north");
        spawn(&mut graph, "npc", "dead", "north");
        for _ in 0..2 {
            graph.add_relationship(NewRelationship::new("at_war_with", a.clone(), b.clone()));
        }
        graph.add_relationship(NewRelationship::new("at_war_with", b, a));
        // 0.5 + min(2 * 2, 5) + 0.5 - 0.2
        assert!((pressures[0].growth(&graph) - 4.8).abs() < 1e-9);
    }

    #[test]
    fn growth_never_negative_and_respects_max() {
        let definition = DeclarativePressure {
            id: "stability".to_string(),
            name: String::new(),
            description: String::new(),
            initial_value: 50.0,
            decay: 0.0,
            growth: PressureGrowth {
                base_growth: -3.0,
                max_growth: Some(1.0),
                ..Default::default()
            },
            contract: None,
        };
        assert_eq!(compile_pressure(&definition).growth(&WorldGraph::default()), 0.0);
    }

    #[test]
    fn cross_culture_ratio_counts_mixed_pairs() {
        let mut graph = WorldGraph::default();
        let a = spawn(&mut graph, "npc", "alive", "north");
        let b = spawn(&mut graph, "npc", "alive", "south");
        let c = spawn(&mut graph, "npc", "alive", "north");
        graph.add_relationship(NewRelationship::new("trades_with", a.clone(), b));
        graph.add_relationship(NewRelationship::new("trades_with", a, c));
        let factor = FeedbackFactor::CrossCultureRatio {
            relationship_kinds: vec!["trades_with".to_string()],
            coefficient: 10.0,
            cap: None,
        };
        assert!((evaluate_factor(&factor, &graph) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn load_rejects_bad_definitions() {
        let duplicate = r#"{"pressures":[{"id":"a"},{"id":"a"}]}"#;
        assert!(matches!(
            load_pressure_file(duplicate),
            Err(PressureLoadError::Duplicate { .. })
        ));
        let out_of_range = r#"{"pressures":[{"id":"a","initial_value":120}]}"#;
        assert!(matches!(
            load_pressure_file(out_of_range),
            Err(PressureLoadError::InitialOutOfRange { .. })
        ));
        let unknown_factor =
            r#"{"pressures":[{"id":"a","growth":{"positive_feedback":[{"type":"vibes","coefficient":1}]}}]}"#;
        assert!(matches!(
            load_pressure_file(unknown_factor),
            Err(PressureLoadError::Parse(_))
        ));
    }

    #[test]
    fn update_always_stays_in_bounds() {
        let settings = PressureSettings::default();
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..5_000 {
            let current = rng.gen_range(-20.0..130.0);
            let value = next_pressure_value(
                current,
                rng.gen_range(0.0..200.0),
                rng.gen_range(0.0..50.0),
                rng.gen_range(-30.0..30.0),
                rng.gen_range(-30.0..30.0),
                &settings,
            );
            assert!((PRESSURE_MIN..=PRESSURE_MAX).contains(&value));
        }
    }

    #[test]
    fn delta_is_smoothed() {
        let settings = PressureSettings::default();
        assert_eq!(next_pressure_value(10.0, 1_000.0, 0.0, 0.0, 0.0, &settings), 25.0);
        assert_eq!(next_pressure_value(50.0, 0.0, 90.0, 0.0, 0.0, &settings), 35.0);
        // Near the ceiling growth is scaled down to the floor.
        let near_max = next_pressure_value(100.0, 10.0, 0.0, 0.0, 0.0, &settings);
        assert_eq!(near_max, 100.0);
        assert!((next_pressure_value(90.0, 10.0, 0.0, 0.0, 0.0, &settings) - 91.9).abs() < 1e-9);
    }

    #[test]
    fn predicted_equilibrium_solves_scaling() {
        let mut definition: DeclarativePressure =
            serde_json::from_str(r#"{"id":"p","decay":1.0,"growth":{"base_growth":2.0}}"#)
                .expect("parse");
        let predicted = predicted_equilibrium(&definition, 0.1);
        assert!((predicted - 100.0 * 0.5f64.sqrt()).abs() < 1e-9);
        definition.decay = 3.0;
        assert_eq!(predicted_equilibrium(&definition, 0.1), 0.0);
    }

    #[test]
    fn interpreter_pulls_towards_resting_point() {
        let definition: DeclarativePressure = serde_json::from_str(
            r#"{"id":"p","initial_value":80,"contract":{"equilibrium":{"expected_range":[20,40],"resting_point":30}}}"#,
        )
        .expect("parse");
        let interpreter = PressureInterpreter::new(
            vec![compile_pressure(&definition)],
            PressureSettings {
                feedback_gain: 0.1,
                ..Default::default()
            },
        );
        let mut graph = WorldGraph::default();
        interpreter.initialize(&mut graph);
        let updates = interpreter.update(&mut graph, None, 0.0);
        assert!((updates[0].value - 75.0).abs() < 1e-9);
        assert_eq!(graph.pressure("p"), updates[0].value);
    }
}
