//! Measurement of the world's statistical shape and its distance from the
//! configured distribution targets.

use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use world_schema::{DistributionTargets, EntityId, GlobalTargets, Prominence};

use crate::graph::WorldGraph;

pub const DEFAULT_CLUSTER_STRENGTH_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphMetrics {
    pub clusters: usize,
    pub average_cluster_size: f64,
    pub largest_cluster: usize,
    pub intra_cluster_density: f64,
    pub inter_cluster_density: f64,
    pub isolated_nodes: usize,
    pub isolated_node_ratio: f64,
}

/// Snapshot of measured ratios. All ratios are fractions of their totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DistributionState {
    pub total_entities: usize,
    pub total_relationships: usize,
    pub entity_kind_counts: BTreeMap<String, usize>,
    pub entity_kind_ratios: BTreeMap<String, f64>,
    pub prominence_ratios: BTreeMap<Prominence, f64>,
    pub prominence_by_kind: BTreeMap<String, BTreeMap<Prominence, f64>>,
    pub relationship_type_ratios: BTreeMap<String, f64>,
    pub relationship_category_ratios: BTreeMap<String, f64>,
    pub graph: GraphMetrics,
}

impl DistributionState {
    pub fn max_single_type_ratio(&self) -> f64 {
        self.relationship_type_ratios
            .values()
            .copied()
            .fold(0.0, f64::max)
    }

    pub fn relationship_types_present(&self) -> usize {
        self.relationship_type_ratios.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationCategory {
    EntityKind,
    Prominence,
    Relationship,
    Connectivity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviationReport {
    pub entity_kind: f64,
    pub prominence: f64,
    pub relationship: f64,
    pub connectivity: f64,
    pub overall: f64,
    /// Signed `measured - target` per kind; negative means under-represented.
    pub entity_kind_gaps: BTreeMap<String, f64>,
    pub prominence_gaps: BTreeMap<Prominence, f64>,
}

impl DeviationReport {
    pub fn worst_category(&self) -> Option<DeviationCategory> {
        [
            (DeviationCategory::EntityKind, self.entity_kind),
            (DeviationCategory::Prominence, self.prominence),
            (DeviationCategory::Relationship, self.relationship),
            (DeviationCategory::Connectivity, self.connectivity),
        ]
        .into_iter()
        .filter(|(_, score)| *score > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(category, _)| category)
    }

    pub fn is_converged(&self, threshold: f64) -> bool {
        self.overall <= threshold
    }

    pub fn gap(&self, kind: &str) -> f64 {
        self.entity_kind_gaps.get(kind).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct DistributionTracker {
    targets: DistributionTargets,
    strength_threshold: f64,
}

impl DistributionTracker {
    pub fn new(targets: DistributionTargets, strength_threshold: f64) -> Self {
        Self {
            targets,
            strength_threshold,
        }
    }

    pub fn targets(&self) -> &DistributionTargets {
        &self.targets
    }

    pub fn strength_threshold(&self) -> f64 {
        self.strength_threshold
    }

    pub fn measure(&self, graph: &WorldGraph) -> DistributionState {
        measure(graph, self.strength_threshold)
    }

    pub fn calculate_deviation(
        &self,
        state: &DistributionState,
        era_id: Option<&str>,
    ) -> DeviationReport {
        let targets = self.targets.for_era(era_id);
        let weights = &self.targets.tuning.correction_strength;
        let mut report = score(state, &targets);
        let total = weights.total();
        report.overall = if total > 0.0 {
            (report.entity_kind * weights.entity_kind
                + report.prominence * weights.prominence
                + report.relationship * weights.relationship
                + report.connectivity * weights.connectivity)
                / total
        } else {
            (report.entity_kind + report.prominence + report.relationship + report.connectivity)
                / 4.0
        };
        report
    }

    pub fn analyze(
        &self,
        graph: &WorldGraph,
    ) -> (DistributionState, DeviationReport) {
        let state = self.measure(graph);
        let era = graph.era_id();
        let era = (!era.is_empty()).then_some(era);
        let report = self.calculate_deviation(&state, era);
        (state, report)
    }
}

pub fn measure(graph: &WorldGraph, strength_threshold: f64) -> DistributionState {
    let mut kind_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut prominence_counts: BTreeMap<Prominence, usize> = BTreeMap::new();
    let mut prominence_by_kind: BTreeMap<String, BTreeMap<Prominence, usize>> = BTreeMap::new();
    for entity in graph.iter_entities() {
        *kind_counts.entry(entity.kind.clone()).or_default() += 1;
        *prominence_counts.entry(entity.prominence).or_default() += 1;
        *prominence_by_kind
            .entry(entity.kind.clone())
            .or_default()
            .entry(entity.prominence)
            .or_default() += 1;
    }
    let total_entities = graph.entity_count();

    let mut type_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_relationships = 0usize;
    for relationship in graph.iter_relationships().filter(|r| r.is_active()) {
        total_relationships += 1;
        *type_counts.entry(relationship.kind.clone()).or_default() += 1;
        if let Some(category) = &relationship.category {
            *category_counts.entry(category.clone()).or_default() += 1;
        }
    }

    DistributionState {
        total_entities,
        total_relationships,
        entity_kind_ratios: ratios(&kind_counts, total_entities),
        entity_kind_counts: kind_counts,
        prominence_ratios: ratios(&prominence_counts, total_entities),
        prominence_by_kind: prominence_by_kind
            .into_iter()
            .map(|(kind, counts)| {
                let total = counts.values().sum();
                (kind, ratios(&counts, total))
            })
            .collect(),
        relationship_type_ratios: ratios(&type_counts, total_relationships),
        relationship_category_ratios: ratios(
            &category_counts,
            category_counts.values().sum(),
        ),
        graph: graph_metrics(graph, strength_threshold),
    }
}

fn ratios<K: Ord + Clone>(counts: &BTreeMap<K, usize>, total: usize) -> BTreeMap<K, f64> {
    if total == 0 {
        return BTreeMap::new();
    }
    counts
        .iter()
        .map(|(key, count)| (key.clone(), *count as f64 / total as f64))
        .collect()
}

/// Undirected connected components over active relationships whose strength
/// is at least `strength_threshold`. Entities without a strong edge form
/// singleton clusters. Components are returned in entity id order.
pub fn detect_clusters(graph: &WorldGraph, strength_threshold: f64) -> Vec<Vec<EntityId>> {
    let mut adjacency: AHashMap<&EntityId, Vec<&EntityId>> = AHashMap::new();
    for relationship in graph.iter_relationships() {
        if !relationship.is_active() || relationship.strength < strength_threshold {
            continue;
        }
        adjacency
            .entry(&relationship.src)
            .or_default()
            .push(&relationship.dst);
        adjacency
            .entry(&relationship.dst)
            .or_default()
            .push(&relationship.src);
    }

    let mut visited: AHashSet<&EntityId> = AHashSet::new();
    let mut clusters = Vec::new();
    for entity in graph.iter_entities() {
        if visited.contains(&entity.id) {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![&entity.id];
        visited.insert(&entity.id);
        while let Some(current) = stack.pop() {
            component.push(current.clone());
            if let Some(neighbours) = adjacency.get(current) {
                for neighbour in neighbours {
                    if graph.contains(neighbour) && visited.insert(*neighbour) {
                        stack.push(*neighbour);
                    }
                }
            }
        }
        component.sort();
        clusters.push(component);
    }
    clusters
}

fn graph_metrics(graph: &WorldGraph, strength_threshold: f64) -> GraphMetrics {
    let total = graph.entity_count();
    if total == 0 {
        return GraphMetrics::default();
    }
    let clusters = detect_clusters(graph, strength_threshold);
    let mut membership: AHashMap<&EntityId, usize> = AHashMap::new();
    for (index, cluster) in clusters.iter().enumerate() {
        for id in cluster {
            membership.insert(id, index);
        }
    }

    let mut intra_pairs: AHashSet<(&EntityId, &EntityId)> = AHashSet::new();
    let mut inter_pairs: AHashSet<(&EntityId, &EntityId)> = AHashSet::new();
    for relationship in graph.iter_relationships().filter(|r| r.is_active()) {
        let (Some(a), Some(b)) = (
            membership.get(&relationship.src),
            membership.get(&relationship.dst),
        ) else {
            continue;
        };
        if relationship.src == relationship.dst {
            continue;
        }
        let pair = if relationship.src < relationship.dst {
            (&relationship.src, &relationship.dst)
        } else {
            (&relationship.dst, &relationship.src)
        };
        if a == b {
            intra_pairs.insert(pair);
        } else {
            inter_pairs.insert(pair);
        }
    }

    let pairs = |n: usize| n * n.saturating_sub(1) / 2;
    let possible_intra: usize = clusters.iter().map(|cluster| pairs(cluster.len())).sum();
    let possible_inter = pairs(total).saturating_sub(possible_intra);
    let density = |actual: usize, possible: usize| {
        if possible == 0 {
            0.0
        } else {
            actual as f64 / possible as f64
        }
    };

    let isolated_nodes = clusters.iter().filter(|cluster| cluster.len() == 1).count();
    GraphMetrics {
        clusters: clusters.len(),
        average_cluster_size: total as f64 / clusters.len() as f64,
        largest_cluster: clusters.iter().map(Vec::len).max().unwrap_or(0),
        intra_cluster_density: density(intra_pairs.len(), possible_intra),
        inter_cluster_density: density(inter_pairs.len(), possible_inter),
        isolated_nodes,
        isolated_node_ratio: isolated_nodes as f64 / total as f64,
    }
}

fn score(state: &DistributionState, targets: &GlobalTargets) -> DeviationReport {
    let (entity_kind, entity_kind_gaps) = ratio_deviation(
        &state.entity_kind_ratios,
        &targets.entity_kind_distribution.targets,
    );
    let (prominence, prominence_gaps) = ratio_deviation(
        &state.prominence_ratios,
        &targets.prominence_distribution.targets,
    );

    let relationship_targets = &targets.relationship_distribution;
    let relationship = (state.max_single_type_ratio()
        - relationship_targets.max_single_type_ratio)
        .max(0.0)
        + 0.05
            * (relationship_targets.min_types_present as f64
                - state.relationship_types_present() as f64)
                .max(0.0);

    DeviationReport {
        entity_kind,
        prominence,
        relationship,
        connectivity: connectivity_deviation(&state.graph, targets),
        overall: 0.0,
        entity_kind_gaps,
        prominence_gaps,
    }
}

/// Mean absolute difference over every key present in either map. An empty
/// target map scores zero.
fn ratio_deviation<K: Ord + Clone>(
    measured: &BTreeMap<K, f64>,
    targets: &BTreeMap<K, f64>,
) -> (f64, BTreeMap<K, f64>) {
    if targets.is_empty() {
        return (0.0, BTreeMap::new());
    }
    let mut gaps = BTreeMap::new();
    for key in targets.keys().chain(measured.keys()) {
        if gaps.contains_key(key) {
            continue;
        }
        let actual = measured.get(key).copied().unwrap_or(0.0);
        let target = targets.get(key).copied().unwrap_or(0.0);
        gaps.insert(key.clone(), actual - target);
    }
    let mean = gaps.values().map(|gap| gap.abs()).sum::<f64>() / gaps.len() as f64;
    (mean, gaps)
}

fn connectivity_deviation(metrics: &GraphMetrics, targets: &GlobalTargets) -> f64 {
    let connectivity = &targets.graph_connectivity;
    let preferred = connectivity.target_clusters.preferred.max(1) as f64;
    let cluster_deviation = (metrics.clusters as f64 - preferred).abs() / preferred;
    let density_deviation = ((metrics.intra_cluster_density
        - connectivity.density_targets.intra_cluster)
        .abs()
        + (metrics.inter_cluster_density - connectivity.density_targets.inter_cluster).abs())
        / 2.0;
    let isolated_excess =
        (metrics.isolated_node_ratio - connectivity.isolated_node_tolerance).max(0.0);
    (cluster_deviation + density_deviation + isolated_excess) / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityDraft, NewRelationship};
    use world_schema::Point;

    fn add(graph: &mut WorldGraph, kind: &str, prominence: Prominence) -> EntityId {
        let x = graph.entity_count() as f64 * 10.0;
        graph
            .create_entity(EntityDraft {
                name: Some(format!("{kind} {x}")),
                prominence,
                coordinates: Some(Point::new(x, 0.0, 0.0)),
                ..EntityDraft::new(kind, "default")
            })
            .expect("create")
    }

    fn exact_targets() -> DistributionTargets {
        let mut targets = DistributionTargets::default();
        let global = &mut targets.global;
        global.entity_kind_distribution.targets =
            BTreeMap::from([("npc".to_string(), 0.5), ("faction".to_string(), 0.5)]);
        global.prominence_distribution.targets = BTreeMap::from([(Prominence::Marginal, 1.0)]);
        global.relationship_distribution.max_single_type_ratio = 1.0;
        global.relationship_distribution.min_types_present = 1;
        let connectivity = &mut global.graph_connectivity;
        connectivity.target_clusters.preferred = 1;
        connectivity.density_targets.intra_cluster = 1.0;
        connectivity.density_targets.inter_cluster = 0.0;
        connectivity.isolated_node_tolerance = 0.0;
        targets
    }

    #[test]
    fn weak_edges_leave_every_node_isolated() {
        let mut graph = WorldGraph::default();
        let ids: Vec<_> = (0..5)
            .map(|_| add(&mut graph, "npc", Prominence::Marginal))
            .collect();
        for pair in ids.windows(2) {
            graph.add_relationship(
                NewRelationship::new("knows", pair[0].clone(), pair[1].clone())
                    .with_strength(0.3),
            );
        }
        let state = measure(&graph, DEFAULT_CLUSTER_STRENGTH_THRESHOLD);
        assert_eq!(state.graph.clusters, 5);
        assert_eq!(state.graph.isolated_node_ratio, 1.0);
        assert_eq!(state.graph.inter_cluster_density, 4.0 / 10.0);
    }

    #[test]
    fn strong_edges_join_components() {
        let mut graph = WorldGraph::default();
        let a = add(&mut graph, "npc", Prominence::Marginal);
        let b = add(&mut graph, "npc", Prominence::Marginal);
        let c = add(&mut graph, "npc", Prominence::Marginal);
        add(&mut graph, "npc", Prominence::Marginal);
        graph.add_relationship(NewRelationship::new("kin", a.clone(), b.clone()).with_strength(0.8));
        graph.add_relationship(NewRelationship::new("kin", c, b).with_strength(0.6));
        let clusters = detect_clusters(&graph, DEFAULT_CLUSTER_STRENGTH_THRESHOLD);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 3);
        assert!(clusters[0].contains(&a));
    }

    #[test]
    fn exact_match_scores_zero() {
        let mut graph = WorldGraph::default();
        let npc = add(&mut graph, "npc", Prominence::Marginal);
        let faction = add(&mut graph, "faction", Prominence::Marginal);
        graph.add_relationship(NewRelationship::new("member_of", npc, faction).with_strength(0.9));
        let tracker = DistributionTracker::new(exact_targets(), DEFAULT_CLUSTER_STRENGTH_THRESHOLD);
        let (_, report) = tracker.analyze(&graph);
        assert_eq!(report.entity_kind, 0.0);
        assert_eq!(report.prominence, 0.0);
        assert_eq!(report.relationship, 0.0);
        assert_eq!(report.connectivity, 0.0);
        assert_eq!(report.overall, 0.0);
        assert_eq!(report.worst_category(), None);
    }

    #[test]
    fn any_mismatch_scores_positive() {
        let mut graph = WorldGraph::default();
        add(&mut graph, "npc", Prominence::Marginal);
        add(&mut graph, "npc", Prominence::Renowned);
        add(&mut graph, "location", Prominence::Marginal);
        let tracker = DistributionTracker::new(exact_targets(), DEFAULT_CLUSTER_STRENGTH_THRESHOLD);
        let (_, report) = tracker.analyze(&graph);
        for score in [
            report.entity_kind,
            report.prominence,
            report.relationship,
            report.connectivity,
            report.overall,
        ] {
            assert!(score > 0.0);
        }
        assert!(report.gap("faction") < 0.0);
        assert!(report.gap("npc") > 0.0);
    }

    #[test]
    fn empty_graph_deviation_is_non_negative() {
        let tracker = DistributionTracker::new(
            DistributionTargets::default(),
            DEFAULT_CLUSTER_STRENGTH_THRESHOLD,
        );
        let (state, report) = tracker.analyze(&WorldGraph::default());
        assert_eq!(state.graph, GraphMetrics::default());
        assert!(report.overall >= 0.0);
        assert!(report.relationship > 0.0);
    }

    #[test]
    fn era_override_replaces_kind_targets() {
        let mut targets = exact_targets();
        targets.per_era.insert(
            "expansion".to_string(),
            world_schema::EraTargetOverride {
                entity_kind_targets: Some(BTreeMap::from([("npc".to_string(), 1.0)])),
                ..Default::default()
            },
        );
        let tracker = DistributionTracker::new(targets, DEFAULT_CLUSTER_STRENGTH_THRESHOLD);
        let mut graph = WorldGraph::default();
        add(&mut graph, "npc", Prominence::Marginal);
        let state = tracker.measure(&graph);
        assert_eq!(tracker.calculate_deviation(&state, Some("expansion")).entity_kind, 0.0);
        assert!(tracker.calculate_deviation(&state, None).entity_kind > 0.0);
    }
}
