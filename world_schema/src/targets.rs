use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entity::Prominence;

/// Statistical targets the engine steers toward.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DistributionTargets {
    pub version: u32,
    pub global: GlobalTargets,
    pub per_era: BTreeMap<String, EraTargetOverride>,
    pub tuning: TargetTuning,
}

impl DistributionTargets {
    /// Global targets with the named era's overrides merged in.
    pub fn for_era(&self, era_id: Option<&str>) -> GlobalTargets {
        let mut merged = self.global.clone();
        let Some(overrides) = era_id.and_then(|id| self.per_era.get(id)) else {
            return merged;
        };
        if let Some(kinds) = &overrides.entity_kind_targets {
            merged.entity_kind_distribution.targets = kinds.clone();
        }
        if let Some(prominence) = &overrides.prominence_targets {
            merged.prominence_distribution.targets = prominence.clone();
        }
        if let Some(max_ratio) = overrides.max_single_type_ratio {
            merged.relationship_distribution.max_single_type_ratio = max_ratio;
        }
        merged
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GlobalTargets {
    pub total_entities: TotalEntitiesTarget,
    pub entity_kind_distribution: RatioTargets<String>,
    pub prominence_distribution: RatioTargets<Prominence>,
    pub relationship_distribution: RelationshipTargets,
    pub graph_connectivity: ConnectivityTargets,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TotalEntitiesTarget {
    pub target: u32,
    pub tolerance: f64,
}

impl Default for TotalEntitiesTarget {
    fn default() -> Self {
        Self {
            target: 150,
            tolerance: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RatioTargets<K: Ord> {
    pub targets: BTreeMap<K, f64>,
    pub tolerance: f64,
}

impl<K: Ord> Default for RatioTargets<K> {
    fn default() -> Self {
        Self {
            targets: BTreeMap::new(),
            tolerance: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RelationshipTargets {
    pub max_single_type_ratio: f64,
    pub min_types_present: u32,
}

impl Default for RelationshipTargets {
    fn default() -> Self {
        Self {
            max_single_type_ratio: 0.3,
            min_types_present: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ConnectivityTargets {
    pub target_clusters: ClusterCountTarget,
    pub density_targets: DensityTargets,
    pub isolated_node_tolerance: f64,
}

impl Default for ConnectivityTargets {
    fn default() -> Self {
        Self {
            target_clusters: ClusterCountTarget::default(),
            density_targets: DensityTargets::default(),
            isolated_node_tolerance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ClusterCountTarget {
    pub min: u32,
    pub max: u32,
    pub preferred: u32,
}

impl Default for ClusterCountTarget {
    fn default() -> Self {
        Self {
            min: 3,
            max: 8,
            preferred: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DensityTargets {
    pub intra_cluster: f64,
    pub inter_cluster: f64,
}

impl Default for DensityTargets {
    fn default() -> Self {
        Self {
            intra_cluster: 0.5,
            inter_cluster: 0.05,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EraTargetOverride {
    pub entity_kind_targets: Option<BTreeMap<String, f64>>,
    pub prominence_targets: Option<BTreeMap<Prominence, f64>>,
    pub max_single_type_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TargetTuning {
    pub convergence_threshold: f64,
    pub correction_strength: CorrectionStrength,
    pub min_template_weight: f64,
    pub max_template_weight: f64,
}

impl Default for TargetTuning {
    fn default() -> Self {
        Self {
            convergence_threshold: 0.08,
            correction_strength: CorrectionStrength::default(),
            min_template_weight: 0.05,
            max_template_weight: 5.0,
        }
    }
}

/// Per-category weights, used both to scale template corrections and to
/// combine category deviations into the overall score.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CorrectionStrength {
    pub entity_kind: f64,
    pub prominence: f64,
    pub relationship: f64,
    pub connectivity: f64,
}

impl Default for CorrectionStrength {
    fn default() -> Self {
        Self {
            entity_kind: 1.0,
            prominence: 0.6,
            relationship: 0.5,
            connectivity: 0.4,
        }
    }
}

impl CorrectionStrength {
    pub fn total(&self) -> f64 {
        self.entity_kind + self.prominence + self.relationship + self.connectivity
    }
}
