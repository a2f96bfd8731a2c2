//! Contract enforcement: activation conditions, saturation, lineage and tag
//! taxonomy checks.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};
use world_schema::{
    AncestorStrategy, ComponentContract, EntityId, EntityOperatorRegistry, HardState,
    LineageRule, RelationshipKey, TagRegistry, TemplateMetadata,
};

use crate::graph::{EntityFilter, NewRelationship, WorldGraph};
use crate::stats::EngineWarning;

pub const MIN_TAGS: usize = 3;
pub const MAX_TAGS: usize = 5;

/// Why a component is not currently enabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationBlock {
    Pressure {
        pressure_id: String,
        value: f64,
    },
    EntityCount {
        kind: String,
        count: usize,
    },
    Era {
        era: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagHealthReport {
    pub total_entities: usize,
    pub optimal_coverage: usize,
    pub coverage_ratio: f64,
    pub under_tagged: usize,
    pub over_tagged: usize,
    pub conflicts: usize,
    pub tag_usage: BTreeMap<String, usize>,
    pub unregistered_tags: Vec<String>,
    /// Tags used more often than their registry `max_usage`.
    pub overused_tags: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct ContractEnforcer {
    registries: Vec<EntityOperatorRegistry>,
    tags: TagRegistry,
    scale_factor: f64,
}

impl Default for ContractEnforcer {
    fn default() -> Self {
        Self::new(Vec::new(), TagRegistry::default())
    }
}

impl ContractEnforcer {
    pub fn new(registries: Vec<EntityOperatorRegistry>, tags: TagRegistry) -> Self {
        Self {
            registries,
            tags,
            scale_factor: 1.0,
        }
    }

    /// Scale expected registry populations the same way population targets
    /// are scaled.
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        if scale_factor.is_finite() && scale_factor > 0.0 {
            self.scale_factor = scale_factor;
        }
        self
    }

    pub fn registries(&self) -> &[EntityOperatorRegistry] {
        &self.registries
    }

    /// Checks `enabled_by`. A missing contract or condition always passes.
    pub fn check_enabled(
        &self,
        contract: Option<&ComponentContract>,
        graph: &WorldGraph,
    ) -> Result<(), ActivationBlock> {
        let Some(enabled_by) = contract.and_then(|contract| contract.enabled_by.as_ref()) else {
            return Ok(());
        };
        for threshold in &enabled_by.pressures {
            let value = graph.pressure(&threshold.pressure_id);
            let above = threshold.min.map_or(true, |min| value >= min);
            let below = threshold.max.map_or(true, |max| value <= max);
            if !(above && below) {
                return Err(ActivationBlock::Pressure {
                    pressure_id: threshold.pressure_id.clone(),
                    value,
                });
            }
        }
        for condition in &enabled_by.entity_counts {
            let mut filter = EntityFilter::kind(&condition.kind);
            filter.subtype = condition.subtype.clone();
            let count = graph.count_entities(&filter);
            let above = condition.min.map_or(true, |min| count >= min as usize);
            let below = condition.max.map_or(true, |max| count <= max as usize);
            if !(above && below) {
                return Err(ActivationBlock::EntityCount {
                    kind: condition.kind.clone(),
                    count,
                });
            }
        }
        if !enabled_by.eras.is_empty() && !enabled_by.eras.iter().any(|era| era == graph.era_id()) {
            return Err(ActivationBlock::Era {
                era: graph.era_id().to_string(),
            });
        }
        Ok(())
    }

    /// Expected population of a registry entry: the declared target, or the
    /// conservative creator capacity. Zero means unbounded.
    pub fn expected_count(registry: &EntityOperatorRegistry) -> u32 {
        registry
            .expected_distribution
            .target_count
            .unwrap_or_else(|| registry.estimated_capacity())
    }

    /// Expected count after scaling. Zero stays zero (unbounded).
    pub fn scaled_expected_count(&self, registry: &EntityOperatorRegistry) -> usize {
        match Self::expected_count(registry) {
            0 => 0,
            expected => (expected as f64 * self.scale_factor).ceil().max(1.0) as usize,
        }
    }

    pub fn is_saturated(&self, graph: &WorldGraph, kind: &str, subtype: Option<&str>) -> bool {
        self.registries
            .iter()
            .filter(|registry| {
                registry.kind == kind
                    && match (&registry.subtype, subtype) {
                        (None, _) => true,
                        (Some(expected), Some(subtype)) => expected == subtype,
                        (Some(_), None) => false,
                    }
            })
            .any(|registry| {
                let expected = self.scaled_expected_count(registry);
                if expected == 0 {
                    return false;
                }
                let mut filter = EntityFilter::kind(&registry.kind);
                filter.subtype = registry.subtype.clone();
                graph.count_entities(&filter) >= expected
            })
    }

    /// First produced kind that is saturated, if any.
    pub fn saturated_output(
        &self,
        graph: &WorldGraph,
        metadata: Option<&TemplateMetadata>,
    ) -> Option<String> {
        metadata?
            .produces
            .entity_kinds
            .iter()
            .find(|produced| self.is_saturated(graph, &produced.kind, produced.subtype.as_deref()))
            .map(|produced| match &produced.subtype {
                Some(subtype) => format!("{}:{}", produced.kind, subtype),
                None => produced.kind.clone(),
            })
    }

    /// Link each new entity with a registered lineage rule to an ancestor.
    /// Entities created in the same batch are never chosen as ancestors.
    pub fn apply_lineage(
        &self,
        graph: &mut WorldGraph,
        created: &[EntityId],
        rng: &mut SmallRng,
    ) -> Vec<RelationshipKey> {
        let mut linked = Vec::new();
        for id in created {
            let Some(entity) = graph.entity(id) else {
                continue;
            };
            let Some(rule) = self
                .registries
                .iter()
                .filter(|registry| registry.matches(&entity.kind, &entity.subtype))
                .find_map(|registry| registry.lineage.as_ref())
            else {
                continue;
            };
            let Some(ancestor) = select_ancestor(graph, rule, &entity, created, rng) else {
                debug!(
                    target: "worldgen::contracts",
                    entity = %id,
                    "lineage.no_ancestor"
                );
                continue;
            };
            let (low, high) = rule.distance_range;
            let distance = if high > low {
                rng.gen_range(low..=high)
            } else {
                low
            };
            let mut relationship =
                NewRelationship::new(&rule.relationship_kind, id.clone(), ancestor.clone())
                    .with_distance(distance);
            relationship.strength = rule.strength;
            if graph.add_relationship(relationship) {
                linked.push(RelationshipKey {
                    kind: rule.relationship_kind.clone(),
                    src: id.clone(),
                    dst: ancestor,
                });
            }
        }
        linked
    }

    /// Warn-only coverage and taxonomy checks for freshly created entities.
    pub fn check_tags(&self, entity: &HardState) -> Vec<EngineWarning> {
        let mut warnings = Vec::new();
        let count = entity.tags.len();
        if !(MIN_TAGS..=MAX_TAGS).contains(&count) {
            warnings.push(EngineWarning::TagCoverage {
                entity: entity.id.clone(),
                tags: count,
            });
        }
        for (left, right) in self.conflicting_pairs(entity) {
            warn!(
                target: "worldgen::contracts",
                entity = %entity.id,
                left = %left,
                right = %right,
                "tags.conflict"
            );
            warnings.push(EngineWarning::TagConflict {
                entity: entity.id.clone(),
                left,
                right,
            });
        }
        warnings
    }

    fn conflicting_pairs(&self, entity: &HardState) -> Vec<(String, String)> {
        let keys: Vec<&String> = entity.tags.keys().collect();
        let mut pairs = Vec::new();
        for (index, left) in keys.iter().enumerate() {
            for right in &keys[index + 1..] {
                if self.tags.conflicts(left, right) {
                    pairs.push(((*left).clone(), (*right).clone()));
                }
            }
        }
        pairs
    }

    pub fn tag_health(&self, graph: &WorldGraph) -> TagHealthReport {
        let mut report = TagHealthReport::default();
        for entity in graph.iter_entities() {
            report.total_entities += 1;
            let count = entity.tags.len();
            if count < MIN_TAGS {
                report.under_tagged += 1;
            } else if count > MAX_TAGS {
                report.over_tagged += 1;
            } else {
                report.optimal_coverage += 1;
            }
            report.conflicts += self.conflicting_pairs(entity).len();
            for tag in entity.tags.keys() {
                *report.tag_usage.entry(tag.clone()).or_default() += 1;
            }
        }
        if report.total_entities > 0 {
            report.coverage_ratio = report.optimal_coverage as f64 / report.total_entities as f64;
        }
        if !self.tags.tags.is_empty() {
            report.unregistered_tags = report
                .tag_usage
                .keys()
                .filter(|tag| !self.tags.contains(tag))
                .cloned()
                .collect();
        }
        for (tag, usage) in &report.tag_usage {
            let limit = self.tags.get(tag).and_then(|definition| definition.max_usage);
            if limit.is_some_and(|limit| *usage > limit as usize) {
                report.overused_tags.insert(tag.clone(), *usage);
            }
        }
        report
    }
}

fn select_ancestor(
    graph: &WorldGraph,
    rule: &LineageRule,
    entity: &HardState,
    exclude: &[EntityId],
    rng: &mut SmallRng,
) -> Option<EntityId> {
    let selector = &rule.ancestor;
    let mut filter = EntityFilter::kind(&selector.kind);
    filter.subtype = selector.subtype.clone();
    filter.status = selector.status.clone();
    let mut candidates: Vec<HardState> = graph
        .find_entities(&filter)
        .into_iter()
        .filter(|candidate| candidate.id != entity.id && !exclude.contains(&candidate.id))
        .collect();
    if selector.strategy == AncestorStrategy::SameCulture {
        candidates.retain(|candidate| candidate.culture.is_some() && candidate.culture == entity.culture);
    }
    let chosen = match selector.strategy {
        AncestorStrategy::Random => candidates.choose(rng),
        AncestorStrategy::HighestProminence => candidates
            .iter()
            .max_by(|a, b| a.prominence.cmp(&b.prominence).then(b.id.cmp(&a.id))),
        AncestorStrategy::MostRecent | AncestorStrategy::SameCulture => candidates
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))),
    };
    chosen.map(|candidate| candidate.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityDraft;
    use rand::SeedableRng;
    use world_schema::{
        flag_tags, AncestorSelector, CreatorRef, EnabledBy, EntityCountCondition, Point,
        PressureThreshold, ProducedEntity, TagDefinition,
    };

    fn spawn(graph: &mut WorldGraph, kind: &str, subtype: &str, tags: &[&str]) -> EntityId {
        let x = graph.entity_count() as f64 * 3.0;
        graph
            .create_entity(EntityDraft {
                name: Some(format!("{subtype} {x}")),
                status: "alive".to_string(),
                tags: flag_tags(tags.iter().copied()),
                culture: Some("north".to_string()),
                coordinates: Some(Point::new(x, 0.0, 0.0)),
                ..EntityDraft::new(kind, subtype)
            })
            .expect("create")
    }

    fn registry(kind: &str, primary_target: u32) -> EntityOperatorRegistry {
        EntityOperatorRegistry {
            kind: kind.to_string(),
            creators: vec![CreatorRef {
                template_id: format!("{kind}_founding"),
                primary: true,
                target_count: primary_target,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn saturation_uses_capacity_when_no_target() {
        let enforcer = ContractEnforcer::new(vec![registry("faction", 1)], TagRegistry::default());
        let mut graph = WorldGraph::default();
        for _ in 0..9 {
            spawn(&mut graph, "faction", "guild", &[]);
        }
        assert!(!enforcer.is_saturated(&graph, "faction", None));
        spawn(&mut graph, "faction", "guild", &[]);
        assert!(enforcer.is_saturated(&graph, "faction", Some("guild")));

        let metadata = TemplateMetadata {
            produces: world_schema::Produces {
                entity_kinds: vec![ProducedEntity {
                    kind: "faction".to_string(),
                    subtype: None,
                    count: (1, 1),
                    prominence: None,
                }],
                relationships: Vec::new(),
            },
            ..Default::default()
        };
        assert_eq!(
            enforcer.saturated_output(&graph, Some(&metadata)).as_deref(),
            Some("faction")
        );
    }

    #[test]
    fn explicit_target_overrides_capacity() {
        let mut faction = registry("faction", 5);
        faction.expected_distribution.target_count = Some(2);
        let enforcer = ContractEnforcer::new(vec![faction], TagRegistry::default());
        let mut graph = WorldGraph::default();
        spawn(&mut graph, "faction", "guild", &[]);
        assert!(!enforcer.is_saturated(&graph, "faction", None));
        spawn(&mut graph, "faction", "guild", &[]);
        assert!(enforcer.is_saturated(&graph, "faction", None));
    }

    #[test]
    fn saturation_follows_the_scale_factor() {
        let mut faction = registry("faction", 5);
        faction.expected_distribution.target_count = Some(4);
        let half = ContractEnforcer::new(vec![faction.clone()], TagRegistry::default())
            .with_scale_factor(0.5);
        let double =
            ContractEnforcer::new(vec![faction.clone()], TagRegistry::default()).with_scale_factor(2.0);
        assert_eq!(half.scaled_expected_count(&faction), 2);
        assert_eq!(double.scaled_expected_count(&faction), 8);

        let mut graph = WorldGraph::default();
        spawn(&mut graph, "faction", "guild", &[]);
        assert!(!half.is_saturated(&graph, "faction", None));
        spawn(&mut graph, "faction", "guild", &[]);
        assert!(half.is_saturated(&graph, "faction", None));
        assert!(!double.is_saturated(&graph, "faction", None));
    }

    #[test]
    fn enabled_by_checks_pressure_counts_and_era() {
        let enforcer = ContractEnforcer::default();
        let mut graph = WorldGraph::default();
        let contract = ComponentContract {
            enabled_by: Some(EnabledBy {
                pressures: vec![PressureThreshold {
                    pressure_id: "conflict".to_string(),
                    min: Some(30.0),
                    max: None,
                }],
                entity_counts: vec![EntityCountCondition {
                    kind: "faction".to_string(),
                    subtype: None,
                    min: Some(1),
                    max: None,
                }],
                eras: vec!["war".to_string()],
            }),
            ..Default::default()
        };
        assert!(matches!(
            enforcer.check_enabled(Some(&contract), &graph),
            Err(ActivationBlock::Pressure { .. })
        ));
        graph.set_pressure("conflict", 45.0);
        assert!(matches!(
            enforcer.check_enabled(Some(&contract), &graph),
            Err(ActivationBlock::EntityCount { count: 0, .. })
        ));
        spawn(&mut graph, "faction", "guild", &[]);
        assert!(matches!(
            enforcer.check_enabled(Some(&contract), &graph),
            Err(ActivationBlock::Era { .. })
        ));
        graph.set_era("war");
        assert_eq!(enforcer.check_enabled(Some(&contract), &graph), Ok(()));
        assert_eq!(enforcer.check_enabled(None, &graph), Ok(()));
    }

    #[test]
    fn lineage_links_to_most_recent_prior_entity() {
        let mut hero = registry("npc", 3);
        hero.lineage = Some(LineageRule {
            relationship_kind: "descended_from".to_string(),
            ancestor: AncestorSelector {
                kind: "npc".to_string(),
                subtype: None,
                status: Some("alive".to_string()),
                strategy: AncestorStrategy::MostRecent,
            },
            distance_range: (0.1, 0.4),
            strength: Some(0.8),
        });
        let enforcer = ContractEnforcer::new(vec![hero], TagRegistry::default());
        let mut graph = WorldGraph::default();
        let mut rng = SmallRng::seed_from_u64(3);

        let first = spawn(&mut graph, "npc", "hero", &[]);
        assert!(enforcer.apply_lineage(&mut graph, &[first.clone()], &mut rng).is_empty());

        graph.advance_tick();
        let second = spawn(&mut graph, "npc", "hero", &[]);
        let third = spawn(&mut graph, "npc", "hero", &[]);
        let linked = enforcer.apply_lineage(&mut graph, &[second.clone(), third.clone()], &mut rng);
        assert_eq!(linked.len(), 2);
        assert!(linked.iter().all(|key| key.dst == first));
        let relationship = &graph.relationships_of(&second)[0];
        let distance = relationship.distance.expect("distance");
        assert!((0.1..=0.4).contains(&distance));
        assert_eq!(relationship.strength, 0.8);
    }

    #[test]
    fn tag_checks_warn_on_coverage_and_conflicts() {
        let tags = TagRegistry {
            tags: vec![TagDefinition {
                tag: "pacifist".to_string(),
                conflicts_with: vec!["warlike".to_string()],
                max_usage: Some(1),
                ..Default::default()
            }],
        };
        let enforcer = ContractEnforcer::new(Vec::new(), tags);
        let mut graph = WorldGraph::default();
        let id = spawn(&mut graph, "npc", "hero", &["pacifist", "warlike"]);
        spawn(&mut graph, "npc", "hero", &["pacifist", "brave", "old"]);
        let entity = graph.entity(&id).expect("entity");
        let warnings = enforcer.check_tags(&entity);
        assert_eq!(warnings.len(), 2);
        assert!(matches!(warnings[0], EngineWarning::TagCoverage { tags: 2, .. }));

        let health = enforcer.tag_health(&graph);
        assert_eq!(health.total_entities, 2);
        assert_eq!(health.optimal_coverage, 1);
        assert_eq!(health.conflicts, 1);
        assert_eq!(health.overused_tags.get("pacifist"), Some(&2));
        assert!(health.unregistered_tags.contains(&"brave".to_string()));
        assert_eq!(health.coverage_ratio, 0.5);
    }
}
