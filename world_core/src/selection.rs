//! Statistically guided weighting of growth templates and simulation systems.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::Rng;
use world_schema::{Era, TargetTuning, TemplateMetadata};

use crate::distribution::{DeviationCategory, DeviationReport};

pub const SYSTEM_MODIFIER_MIN: f64 = 0.2;
pub const SYSTEM_MODIFIER_MAX: f64 = 2.0;
/// Hard band around a template's base weight.
pub const BASE_WEIGHT_FLOOR: f64 = 0.2;
pub const BASE_WEIGHT_CEILING: f64 = 2.0;

/// `1 / (1 + runs²)`: 1.0, 0.5, 0.2, 0.1, then under 0.06.
pub fn diversity_penalty(runs: u32) -> f64 {
    let runs = runs as f64;
    1.0 / (1.0 + runs * runs)
}

/// Draw `r` uniformly from [0, 1) and return the first index whose
/// cumulative weight reaches `r * total`. Non-positive or non-finite weights
/// count as zero. When every weight is zero the pick is uniform.
pub fn weighted_pick(weights: &[f64], rng: &mut SmallRng) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let sanitized = |weight: f64| {
        if weight.is_finite() && weight > 0.0 {
            weight
        } else {
            0.0
        }
    };
    let total: f64 = weights.iter().copied().map(sanitized).sum();
    if total <= 0.0 {
        return Some(rng.gen_range(0..weights.len()));
    }
    let threshold = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut last_positive = 0;
    for (index, weight) in weights.iter().copied().map(sanitized).enumerate() {
        if weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last_positive = index;
        if cumulative >= threshold {
            return Some(index);
        }
    }
    Some(last_positive)
}

/// Applies the statistical correction to era template weights.
#[derive(Debug, Clone)]
pub struct TemplateSelector {
    tuning: TargetTuning,
}

impl TemplateSelector {
    pub fn new(tuning: TargetTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &TargetTuning {
        &self.tuning
    }

    /// Era weight for each template after distribution correction.
    ///
    /// Below the convergence threshold the era weights pass through. Above
    /// it, templates producing under-represented kinds are boosted and those
    /// producing over-represented kinds suppressed; templates whose declared
    /// graph effects address the worst category get an extra boost. Results
    /// are clamped to the tuning bounds and then to the hard band around the
    /// base weight. A zero base weight stays zero.
    pub fn adjusted_weights<'a, I>(
        &self,
        templates: I,
        era: &Era,
        report: &DeviationReport,
    ) -> BTreeMap<String, f64>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a TemplateMetadata>)>,
    {
        templates
            .into_iter()
            .map(|(id, metadata)| {
                let base = era.template_weight(id);
                (id.to_string(), self.adjust(base, metadata, report))
            })
            .collect()
    }

    fn adjust(&self, base: f64, metadata: Option<&TemplateMetadata>, report: &DeviationReport) -> f64 {
        if !base.is_finite() || base <= 0.0 {
            return 0.0;
        }
        if report.overall <= self.tuning.convergence_threshold {
            return base;
        }
        let Some(metadata) = metadata else {
            return base;
        };
        let strength = &self.tuning.correction_strength;
        let mut multiplier = 1.0;

        let produced = &metadata.produces.entity_kinds;
        if !produced.is_empty() {
            let mean_gap = produced
                .iter()
                .map(|entity| report.gap(&entity.kind))
                .sum::<f64>()
                / produced.len() as f64;
            multiplier *= (1.0 - 4.0 * mean_gap * strength.entity_kind).max(0.0);
        }

        let effects = &metadata.effects;
        let effect_boost = match report.worst_category() {
            Some(DeviationCategory::Connectivity) => {
                effects.cluster_formation.max(effects.graph_density) * strength.connectivity
            }
            Some(DeviationCategory::Relationship) => {
                effects.diversity_impact * strength.relationship
            }
            Some(DeviationCategory::Prominence) => {
                let spread: f64 = produced
                    .iter()
                    .filter_map(|entity| entity.prominence)
                    .map(|prominence| -report.prominence_gaps.get(&prominence).copied().unwrap_or(0.0))
                    .sum();
                spread.max(0.0) * strength.prominence
            }
            Some(DeviationCategory::EntityKind) | None => 0.0,
        };
        multiplier *= 1.0 + effect_boost.max(-0.5);

        let weight = (base * multiplier)
            .clamp(self.tuning.min_template_weight, self.tuning.max_template_weight);
        weight.clamp(base * BASE_WEIGHT_FLOOR, base * BASE_WEIGHT_CEILING)
    }
}

/// Clamp an era-declared system modifier. Zero disables the system outright.
pub fn system_modifier(era_value: f64) -> f64 {
    if era_value == 0.0 {
        return 0.0;
    }
    if !era_value.is_finite() {
        return 1.0;
    }
    era_value.clamp(SYSTEM_MODIFIER_MIN, SYSTEM_MODIFIER_MAX)
}

#[derive(Debug, Clone, Default)]
pub struct SystemSelector;

impl SystemSelector {
    /// Per-system modifier for the tick. The deviation report is accepted so
    /// callers stay agnostic of the policy; the policy itself is the clamped
    /// era value.
    pub fn modifier(&self, system_id: &str, era: &Era, _report: &DeviationReport) -> f64 {
        system_modifier(era.system_modifier(system_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use world_schema::{GraphEffects, ProducedEntity, Produces};

    fn producing(kind: &str) -> TemplateMetadata {
        TemplateMetadata {
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
        }
    }

    fn skewed_report() -> DeviationReport {
        DeviationReport {
            entity_kind: 0.3,
            overall: 0.3,
            entity_kind_gaps: BTreeMap::from([
                ("npc".to_string(), 0.3),
                ("faction".to_string(), -0.3),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn diversity_penalty_values() {
        assert_eq!(diversity_penalty(0), 1.0);
        assert_eq!(diversity_penalty(1), 0.5);
        assert_eq!(diversity_penalty(2), 0.2);
        assert_eq!(diversity_penalty(3), 0.1);
        assert!(diversity_penalty(4) < 0.06);
        for runs in 0..50 {
            let expected = 1.0 / (1.0 + (runs * runs) as f64);
            assert_eq!(diversity_penalty(runs), expected);
        }
    }

    #[test]
    fn weighted_pick_matches_three_to_one() {
        let mut rng = SmallRng::seed_from_u64(42);
        let draws = 1_000;
        let first = (0..draws)
            .filter(|_| weighted_pick(&[3.0, 1.0], &mut rng) == Some(0))
            .count();
        // Binomial(1000, 0.75): mean 750, sd ~13.7.
        assert!((700..=800).contains(&first), "first picked {first} times");
    }

    #[test]
    fn weighted_pick_edge_cases() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(weighted_pick(&[], &mut rng), None);
        assert_eq!(weighted_pick(&[0.0, 5.0, 0.0], &mut rng), Some(1));
        let mut seen = [false; 3];
        for _ in 0..200 {
            let index = weighted_pick(&[0.0, 0.0, 0.0], &mut rng).expect("uniform pick");
            seen[index] = true;
        }
        assert!(seen.iter().all(|hit| *hit));
    }

    #[test]
    fn zero_era_modifier_disables_system() {
        let era = Era {
            system_modifiers: BTreeMap::from([("A".to_string(), 0.0), ("B".to_string(), 9.0)]),
            ..Default::default()
        };
        let selector = SystemSelector;
        assert_eq!(selector.modifier("A", &era, &skewed_report()), 0.0);
        assert_eq!(selector.modifier("B", &era, &DeviationReport::default()), 2.0);
        assert_eq!(selector.modifier("C", &era, &DeviationReport::default()), 1.0);
        assert_eq!(system_modifier(0.01), SYSTEM_MODIFIER_MIN);
    }

    #[test]
    fn correction_boosts_underrepresented_producers() {
        let selector = TemplateSelector::new(TargetTuning::default());
        let era = Era::default();
        let npc = producing("npc");
        let faction = producing("faction");
        let weights = selector.adjusted_weights(
            [("npc_birth", Some(&npc)), ("faction_rise", Some(&faction)), ("plain", None)],
            &era,
            &skewed_report(),
        );
        assert!(weights["npc_birth"] < 1.0);
        assert!(weights["faction_rise"] > 1.0);
        assert_eq!(weights["plain"], 1.0);
        for weight in weights.values() {
            assert!((BASE_WEIGHT_FLOOR..=BASE_WEIGHT_CEILING).contains(weight));
        }
    }

    #[test]
    fn converged_state_passes_era_weights_through() {
        let selector = TemplateSelector::new(TargetTuning::default());
        let era = Era {
            template_weights: BTreeMap::from([("npc_birth".to_string(), 3.0), ("off".to_string(), 0.0)]),
            ..Default::default()
        };
        let npc = producing("npc");
        let weights = selector.adjusted_weights(
            [("npc_birth", Some(&npc)), ("off", Some(&npc))],
            &era,
            &DeviationReport::default(),
        );
        assert_eq!(weights["npc_birth"], 3.0);
        assert_eq!(weights["off"], 0.0);
    }

    #[test]
    fn weights_stay_in_hard_band() {
        let selector = TemplateSelector::new(TargetTuning::default());
        let mut metadata = producing("faction");
        metadata.effects = GraphEffects {
            graph_density: 5.0,
            cluster_formation: 5.0,
            diversity_impact: 5.0,
        };
        let mut report = skewed_report();
        report.entity_kind_gaps.insert("faction".to_string(), -0.9);
        for base in [0.1, 1.0, 4.0] {
            let era = Era {
                template_weights: BTreeMap::from([("t".to_string(), base)]),
                ..Default::default()
            };
            let weight = selector.adjusted_weights([("t", Some(&metadata))], &era, &report)["t"];
            assert!(weight >= base * BASE_WEIGHT_FLOOR - 1e-12);
            assert!(weight <= base * BASE_WEIGHT_CEILING + 1e-12);
        }
    }
}
