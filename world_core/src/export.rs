//! Final world snapshot handed to hosts once a run completes.

use std::collections::BTreeMap;

use serde::Serialize;
use world_schema::{HardState, HistoryEvent, Relationship};

use crate::distribution::{DeviationReport, DistributionState};
use crate::enrichment::{ImageRecord, LoreRecord};
use crate::homeostasis::LoopStatus;
use crate::stats::{EngineWarning, TemplateUsage, TerminationReason};

#[derive(Debug, Clone, Serialize)]
pub struct ExportMetadata {
    pub seed: u64,
    pub tick: u64,
    pub epoch: u32,
    pub era: String,
    pub entity_count: usize,
    pub relationship_count: usize,
    pub historical_relationship_count: usize,
    pub termination: Option<TerminationReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedWorld {
    pub metadata: ExportMetadata,
    pub entities: Vec<HardState>,
    /// Active relationships only.
    pub relationships: Vec<Relationship>,
    pub historical_relationships: Vec<Relationship>,
    pub history: Vec<HistoryEvent>,
    pub pressures: BTreeMap<String, f64>,
    pub distribution: DistributionState,
    pub deviation: DeviationReport,
    pub template_usage: BTreeMap<String, TemplateUsage>,
    pub feedback_loops: Vec<LoopStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lore: Vec<LoreRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRecord>,
    pub warnings: Vec<EngineWarning>,
}

impl ExportedWorld {
    /// Split relationships into active and historical sets.
    pub fn partition_relationships(
        relationships: Vec<Relationship>,
    ) -> (Vec<Relationship>, Vec<Relationship>) {
        relationships
            .into_iter()
            .partition(|relationship| relationship.is_active())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use world_schema::{EntityId, RelationshipStatus};

    fn relationship(kind: &str, status: RelationshipStatus) -> Relationship {
        Relationship {
            kind: kind.to_string(),
            src: EntityId::new("npc_0"),
            dst: EntityId::new("npc_1"),
            strength: 0.5,
            distance: None,
            category: None,
            status,
            created_at: 0,
        }
    }

    #[test]
    fn historical_relationships_are_split_out() {
        let (active, historical) = ExportedWorld::partition_relationships(vec![
            relationship("friend_of", RelationshipStatus::Active),
            relationship("rival_of", RelationshipStatus::Historical),
        ]);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, "friend_of");
        assert_eq!(historical.len(), 1);
        assert_eq!(historical[0].kind, "rival_of");
    }
}
