//! Homeostatic control: population tracking, template weight multipliers and
//! feedback-loop diagnostics.

use std::collections::BTreeMap;

use serde::Serialize;
use world_schema::{FeedbackLoop, LoopPolarity, TemplateMetadata};

use crate::graph::WorldGraph;

pub const OUTLIER_THRESHOLD: f64 = 0.3;
pub const MIN_CORRELATION_SAMPLES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationMetric {
    pub kind: String,
    pub subtype: Option<String>,
    pub count: usize,
    pub target: f64,
    /// `(count - target) / target`.
    pub deviation: f64,
    /// Change in count since the previous update.
    pub trend: i64,
}

impl PopulationMetric {
    pub fn label(&self) -> String {
        match &self.subtype {
            Some(subtype) => format!("{}:{}", self.kind, subtype),
            None => self.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulationReport {
    pub epoch: u32,
    pub metrics: Vec<PopulationMetric>,
    pub over_populated: Vec<String>,
    pub under_populated: Vec<String>,
}

impl PopulationReport {
    pub fn deviation(&self, kind: &str, subtype: Option<&str>) -> Option<f64> {
        self.metrics
            .iter()
            .find(|metric| metric.kind == kind && metric.subtype.as_deref() == subtype)
            .map(|metric| metric.deviation)
    }
}

/// Recorded metric values for one epoch, keyed by `MetricRef::key`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSample {
    pub epoch: u32,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct PopulationTracker {
    kind_targets: BTreeMap<String, f64>,
    subtype_targets: BTreeMap<(String, String), f64>,
    previous_counts: BTreeMap<String, usize>,
    report: PopulationReport,
    history: Vec<MetricSample>,
}

impl PopulationTracker {
    pub fn new(
        kind_targets: BTreeMap<String, f64>,
        subtype_targets: BTreeMap<(String, String), f64>,
    ) -> Self {
        Self {
            kind_targets,
            subtype_targets,
            ..Default::default()
        }
    }

    /// Recompute the report from the current graph without recording an
    /// epoch sample. Trends stay relative to the last recorded epoch.
    pub fn refresh(&mut self, graph: &WorldGraph) -> &PopulationReport {
        let (kind_counts, subtype_counts) = count_entities(graph);
        self.report = self.build_report(graph.epoch(), &kind_counts, &subtype_counts);
        &self.report
    }

    /// Recompute the report and record this epoch's metric sample.
    pub fn update(&mut self, graph: &WorldGraph) -> &PopulationReport {
        let (kind_counts, subtype_counts) = count_entities(graph);
        let report = self.build_report(graph.epoch(), &kind_counts, &subtype_counts);
        self.previous_counts = report
            .metrics
            .iter()
            .map(|metric| (metric.label(), metric.count))
            .collect();

        let mut values = BTreeMap::new();
        values.insert("entities".to_string(), graph.entity_count() as f64);
        let mut relationship_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut active = 0usize;
        for relationship in graph.iter_relationships().filter(|r| r.is_active()) {
            active += 1;
            *relationship_counts
                .entry(relationship.kind.clone())
                .or_default() += 1;
        }
        values.insert("relationships".to_string(), active as f64);
        for (kind, count) in relationship_counts {
            values.insert(format!("relationships:{kind}"), count as f64);
        }
        for (kind, count) in kind_counts {
            values.insert(format!("entities:{kind}"), count as f64);
        }
        for ((kind, subtype), count) in subtype_counts {
            values.insert(format!("entities:{kind}:{subtype}"), count as f64);
        }
        for (id, value) in graph.pressures() {
            values.insert(format!("pressure:{id}"), value);
        }
        self.history.push(MetricSample {
            epoch: graph.epoch(),
            values,
        });

        self.report = report;
        &self.report
    }

    fn build_report(
        &self,
        epoch: u32,
        kind_counts: &BTreeMap<String, usize>,
        subtype_counts: &BTreeMap<(String, String), usize>,
    ) -> PopulationReport {
        let mut metrics = Vec::new();
        for (kind, target) in &self.kind_targets {
            let count = kind_counts.get(kind).copied().unwrap_or(0);
            metrics.push(self.metric(kind.clone(), None, count, *target));
        }
        for ((kind, subtype), target) in &self.subtype_targets {
            let count = subtype_counts
                .get(&(kind.clone(), subtype.clone()))
                .copied()
                .unwrap_or(0);
            metrics.push(self.metric(kind.clone(), Some(subtype.clone()), count, *target));
        }

        let over_populated = metrics
            .iter()
            .filter(|metric| metric.deviation > OUTLIER_THRESHOLD)
            .map(PopulationMetric::label)
            .collect();
        let under_populated = metrics
            .iter()
            .filter(|metric| metric.deviation < -OUTLIER_THRESHOLD)
            .map(PopulationMetric::label)
            .collect();
        PopulationReport {
            epoch,
            metrics,
            over_populated,
            under_populated,
        }
    }

    fn metric(&self, kind: String, subtype: Option<String>, count: usize, target: f64) -> PopulationMetric {
        let label = match &subtype {
            Some(subtype) => format!("{kind}:{subtype}"),
            None => kind.clone(),
        };
        let previous = self.previous_counts.get(&label).copied().unwrap_or(0);
        let deviation = if target > 0.0 {
            (count as f64 - target) / target
        } else {
            0.0
        };
        PopulationMetric {
            kind,
            subtype,
            count,
            target,
            deviation,
            trend: count as i64 - previous as i64,
        }
    }

    pub fn report(&self) -> &PopulationReport {
        &self.report
    }

    pub fn history(&self) -> &[MetricSample] {
        &self.history
    }

    pub fn outliers(&self, threshold: f64) -> (Vec<&PopulationMetric>, Vec<&PopulationMetric>) {
        let over = self
            .report
            .metrics
            .iter()
            .filter(|metric| metric.deviation > threshold)
            .collect();
        let under = self
            .report
            .metrics
            .iter()
            .filter(|metric| metric.deviation < -threshold)
            .collect();
        (over, under)
    }
}

/// Turns population deviations into per-template multipliers.
#[derive(Debug, Clone)]
pub struct DynamicWeightCalculator {
    pub strength: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
}

impl Default for DynamicWeightCalculator {
    fn default() -> Self {
        Self {
            strength: 0.5,
            min_multiplier: 0.2,
            max_multiplier: 2.0,
        }
    }
}

impl DynamicWeightCalculator {
    /// Mean of `1 - deviation * strength` over the kinds a template produces,
    /// preferring subtype metrics when tracked. Untracked output is neutral.
    pub fn multiplier(&self, metadata: Option<&TemplateMetadata>, report: &PopulationReport) -> f64 {
        let Some(metadata) = metadata else {
            return 1.0;
        };
        let factors: Vec<f64> = metadata
            .produces
            .entity_kinds
            .iter()
            .filter_map(|produced| {
                produced
                    .subtype
                    .as_deref()
                    .and_then(|subtype| report.deviation(&produced.kind, Some(subtype)))
                    .or_else(|| report.deviation(&produced.kind, None))
            })
            .map(|deviation| 1.0 - deviation.clamp(-1.0, 4.0) * self.strength)
            .collect();
        if factors.is_empty() {
            return 1.0;
        }
        let mean = factors.iter().sum::<f64>() / factors.len() as f64;
        mean.clamp(self.min_multiplier, self.max_multiplier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopHealth {
    Functioning,
    /// Correlation is strong but points the wrong way.
    Broken,
    /// Correlation too weak to call either way.
    Weak,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopStatus {
    pub id: String,
    pub health: LoopHealth,
    pub correlation: Option<f64>,
    pub samples: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackAnalyzer {
    loops: Vec<FeedbackLoop>,
}

impl FeedbackAnalyzer {
    pub fn new(loops: Vec<FeedbackLoop>) -> Self {
        Self { loops }
    }

    pub fn loops(&self) -> &[FeedbackLoop] {
        &self.loops
    }

    pub fn validate(&self, history: &[MetricSample]) -> Vec<LoopStatus> {
        self.loops
            .iter()
            .map(|feedback_loop| evaluate_loop(feedback_loop, history))
            .collect()
    }
}

fn evaluate_loop(feedback_loop: &FeedbackLoop, history: &[MetricSample]) -> LoopStatus {
    let source = deltas(history, &feedback_loop.source.key());
    let target = deltas(history, &feedback_loop.target.key());
    let lag = feedback_loop.lag as usize;
    let pairs: Vec<(f64, f64)> = source
        .iter()
        .copied()
        .zip(target.iter().copied().skip(lag))
        .collect();

    let status = |health, correlation| LoopStatus {
        id: feedback_loop.id.clone(),
        health,
        correlation,
        samples: pairs.len(),
    };
    if pairs.len() < MIN_CORRELATION_SAMPLES {
        return status(LoopHealth::Inconclusive, None);
    }
    let Some(correlation) = pearson(&pairs) else {
        return status(LoopHealth::Inconclusive, None);
    };
    let expected_sign = match feedback_loop.polarity {
        LoopPolarity::Positive => 1.0,
        LoopPolarity::Negative => -1.0,
    };
    let health = if correlation.abs() < feedback_loop.min_strength {
        LoopHealth::Weak
    } else if correlation * expected_sign > 0.0 {
        LoopHealth::Functioning
    } else {
        LoopHealth::Broken
    };
    status(health, Some(correlation))
}

fn deltas(history: &[MetricSample], key: &str) -> Vec<f64> {
    let values: Vec<f64> = history
        .iter()
        .map(|sample| sample.values.get(key).copied().unwrap_or(0.0))
        .collect();
    values.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

/// `None` when either side has zero variance.
fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut variance_x = 0.0;
    let mut variance_y = 0.0;
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        covariance += dx * dy;
        variance_x += dx * dx;
        variance_y += dy * dy;
    }
    if variance_x <= f64::EPSILON || variance_y <= f64::EPSILON {
        return None;
    }
    Some(covariance / (variance_x.sqrt() * variance_y.sqrt()))
}

type EntityCounts = (BTreeMap<String, usize>, BTreeMap<(String, String), usize>);

fn count_entities(graph: &WorldGraph) -> EntityCounts {
    let mut kind_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut subtype_counts: BTreeMap<(String, String), usize> = BTreeMap::new();
    for entity in graph.iter_entities() {
        *kind_counts.entry(entity.kind.clone()).or_default() += 1;
        *subtype_counts
            .entry((entity.kind.clone(), entity.subtype.clone()))
            .or_default() += 1;
    }
    (kind_counts, subtype_counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityDraft;
    use world_schema::{MetricRef, Point, ProducedEntity, Produces};

    fn spawn(graph: &mut WorldGraph, kind: &str, subtype: &str) {
        let x = graph.entity_count() as f64 * 4.0;
        graph
            .create_entity(EntityDraft {
                name: Some(format!("{kind}{x}")),
                coordinates: Some(Point::new(x, 0.0, 0.0)),
                ..EntityDraft::new(kind, subtype)
            })
            .expect("create");
    }

    fn sample(epoch: u32, source: f64, target: f64) -> MetricSample {
        MetricSample {
            epoch,
            values: BTreeMap::from([
                ("pressure:conflict".to_string(), source),
                ("entities:npc".to_string(), target),
            ]),
        }
    }

    fn conflict_loop(polarity: LoopPolarity, lag: u32) -> FeedbackLoop {
        FeedbackLoop {
            id: "conflict_culls_npcs".to_string(),
            description: String::new(),
            source: MetricRef::Pressure {
                id: "conflict".to_string(),
            },
            target: MetricRef::EntityCount {
                kind: "npc".to_string(),
                subtype: None,
            },
            polarity,
            lag,
            min_strength: 0.1,
        }
    }

    #[test]
    fn tracker_flags_outliers_and_records_history() {
        let mut tracker = PopulationTracker::new(
            BTreeMap::from([("npc".to_string(), 2.0), ("faction".to_string(), 4.0)]),
            BTreeMap::from([(("npc".to_string(), "hero".to_string()), 1.0)]),
        );
        let mut graph = WorldGraph::default();
        for _ in 0..3 {
            spawn(&mut graph, "npc", "hero");
        }
        spawn(&mut graph, "faction", "guild");
        graph.set_pressure("conflict", 12.0);

        let report = tracker.update(&graph).clone();
        assert_eq!(report.deviation("npc", None), Some(0.5));
        assert_eq!(report.deviation("faction", None), Some(-0.75));
        assert_eq!(report.deviation("npc", Some("hero")), Some(2.0));
        assert_eq!(report.over_populated, vec!["npc".to_string(), "npc:hero".to_string()]);
        assert_eq!(report.under_populated, vec!["faction".to_string()]);

        let (over, under) = tracker.outliers(OUTLIER_THRESHOLD);
        assert_eq!((over.len(), under.len()), (2, 1));

        let values = &tracker.history()[0].values;
        assert_eq!(values["entities"], 4.0);
        assert_eq!(values["entities:npc:hero"], 3.0);
        assert_eq!(values["pressure:conflict"], 12.0);

        spawn(&mut graph, "faction", "guild");
        let report = tracker.update(&graph);
        let faction = report
            .metrics
            .iter()
            .find(|metric| metric.kind == "faction")
            .expect("faction metric");
        assert_eq!(faction.trend, 1);
        assert_eq!(tracker.history().len(), 2);
    }

    #[test]
    fn dynamic_weights_suppress_overpopulated_output() {
        let calculator = DynamicWeightCalculator::default();
        let report = PopulationReport {
            metrics: vec![
                PopulationMetric {
                    kind: "npc".to_string(),
                    subtype: None,
                    count: 20,
                    target: 10.0,
                    deviation: 1.0,
                    trend: 0,
                },
                PopulationMetric {
                    kind: "faction".to_string(),
                    subtype: None,
                    count: 5,
                    target: 10.0,
                    deviation: -0.5,
                    trend: 0,
                },
            ],
            ..Default::default()
        };
        let produces = |kind: &str| TemplateMetadata {
            produces: Produces {
                entity_kinds: vec![ProducedEntity {
                    kind: kind.to_string(),
                    subtype: None,
                    count: (1, 1),
                    prominence: None,
                }],
                relationships: Vec::new(),
            },
            ..Default::default()
        };
        assert_eq!(calculator.multiplier(Some(&produces("npc")), &report), 0.5);
        assert_eq!(calculator.multiplier(Some(&produces("faction")), &report), 1.25);
        assert_eq!(calculator.multiplier(Some(&produces("location")), &report), 1.0);
        assert_eq!(calculator.multiplier(None, &report), 1.0);
    }

    #[test]
    fn refresh_tracks_growth_without_recording_a_sample() {
        let calculator = DynamicWeightCalculator::default();
        let npcs = TemplateMetadata {
            produces: Produces {
                entity_kinds: vec![ProducedEntity {
                    kind: "npc".to_string(),
                    subtype: None,
                    count: (1, 1),
                    prominence: None,
                }],
                relationships: Vec::new(),
            },
            ..Default::default()
        };
        let mut tracker =
            PopulationTracker::new(BTreeMap::from([("npc".to_string(), 2.0)]), BTreeMap::new());
        let mut graph = WorldGraph::default();
        tracker.update(&graph);
        let starved = calculator.multiplier(Some(&npcs), tracker.report());
        assert!(starved > 1.0);

        for _ in 0..4 {
            spawn(&mut graph, "npc", "hero");
        }
        let report = tracker.refresh(&graph);
        assert_eq!(report.deviation("npc", None), Some(1.0));
        assert_eq!(report.over_populated, vec!["npc".to_string()]);
        assert_eq!(calculator.multiplier(Some(&npcs), tracker.report()), 0.5);
        assert_eq!(tracker.history().len(), 1);
    }

    #[test]
    fn negative_loop_with_inverse_deltas_functions() {
        let history: Vec<_> = [(10.0, 50.0), (20.0, 45.0), (25.0, 43.0), (40.0, 30.0), (42.0, 29.0)]
            .iter()
            .enumerate()
            .map(|(epoch, (source, target))| sample(epoch as u32, *source, *target))
            .collect();
        let analyzer = FeedbackAnalyzer::new(vec![
            conflict_loop(LoopPolarity::Negative, 0),
            conflict_loop(LoopPolarity::Positive, 0),
        ]);
        let statuses = analyzer.validate(&history);
        assert_eq!(statuses[0].health, LoopHealth::Functioning);
        assert_eq!(statuses[1].health, LoopHealth::Broken);
        assert!(statuses[0].correlation.expect("correlation") < -0.9);
        assert_eq!(statuses[0].samples, 4);
    }

    #[test]
    fn short_or_flat_history_is_inconclusive() {
        let analyzer = FeedbackAnalyzer::new(vec![conflict_loop(LoopPolarity::Positive, 1)]);
        let short: Vec<_> = (0..3).map(|epoch| sample(epoch, epoch as f64, 1.0)).collect();
        assert_eq!(analyzer.validate(&short)[0].health, LoopHealth::Inconclusive);
        let flat: Vec<_> = (0..8).map(|epoch| sample(epoch, epoch as f64, 5.0)).collect();
        let status = &analyzer.validate(&flat)[0];
        assert_eq!(status.health, LoopHealth::Inconclusive);
        assert_eq!(status.correlation, None);
    }
}
